//! Resolves domain objects by stable identifier and checks them against an expected baseline

use crate::host::UnresolvedTarget;

use super::{DomainObject, ObjectRef, ObjectTables, Role};

/// Looks up the object carrying `stable_id`
pub fn resolve<T>(tables: &T, stable_id: &str) -> Option<ObjectRef>
where
    T: ObjectTables + ?Sized,
{
    tables.find_first(&|object| object.stable_id() == stable_id)
}

/// Configuration an object must still have for a patch to touch it.
///
/// If the object differs, something else already changed it and the patch backs off.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    /// Expected primary beneficiary
    pub primary_role: Role,
    /// Expected primary bonus, compared exactly
    pub primary_bonus: f32,
}
impl Baseline {
    /// Whether `object` still has this configuration
    #[allow(clippy::float_cmp)]
    pub fn matches(&self, object: &DomainObject) -> bool {
        let fields = object.fields();
        fields.primary_role == self.primary_role && fields.primary_bonus == self.primary_bonus
    }
}

/// Cached reference to one domain object, re-resolved on every reset
#[derive(Debug, Clone)]
pub struct Resolver {
    /// Identifier to resolve
    stable_id: &'static str,
    /// Object found by the last reset, if any
    object: Option<ObjectRef>,
}
impl Resolver {
    /// Creates an unresolved reference to `stable_id`
    pub const fn new(stable_id: &'static str) -> Self {
        Self {
            stable_id,
            object: None,
        }
    }
    /// Identifier this resolves
    pub fn stable_id(&self) -> &'static str {
        self.stable_id
    }
    /// Drops the cached reference and looks the object up again.
    ///
    /// Leaves the reference empty if the object is gone.
    pub fn reset<T>(&mut self, tables: &T)
    where
        T: ObjectTables + ?Sized,
    {
        self.object = resolve(tables, self.stable_id);
    }
    /// Object found by the last reset
    pub fn object(&self) -> Option<&ObjectRef> {
        self.object.as_ref()
    }
    /// Object found by the last reset, or why there is none
    pub fn require(&self) -> Result<&ObjectRef, UnresolvedTarget> {
        self.object.as_ref().ok_or_else(|| UnresolvedTarget::ObjectMissing {
            id: self.stable_id.to_owned(),
        })
    }
    /// Whether the object is resolved and still matches `baseline`
    pub fn matches(&self, baseline: &Baseline) -> bool {
        self.object.as_ref().map_or(false, |object| {
            let object = object.read().unwrap_or_else(|e| e.into_inner());
            baseline.matches(&object)
        })
    }
}
