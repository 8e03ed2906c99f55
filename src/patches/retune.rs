//! Patch that retunes a domain object and hooks the functions that read it

use crate::domain::resolver::{Baseline, Resolver};
use crate::domain::{ObjectRef, Role};
use crate::host::Host;
use crate::lifecycle::{Patch, Rejection, Target};

/// New primary configuration for the object
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Retune {
    /// New primary beneficiary
    pub primary_role: Role,
    /// New primary bonus
    pub primary_bonus: f32,
}

/// Resolves one domain object, checks it against a baseline, retunes it and hooks its readers
#[derive(Debug, Clone)]
pub struct RetunePatch {
    /// Name for diagnostics
    name: &'static str,
    /// Reference to the object being retuned
    resolver: Resolver,
    /// What the object must look like before the patch touches it
    baseline: Baseline,
    /// What the object looks like afterwards
    retune: Retune,
    /// Functions that need hooks for the retuned object to take effect
    targets: Vec<Target>,
}
impl RetunePatch {
    /// Creates a patch for the object with `stable_id`
    pub fn new(name: &'static str, stable_id: &'static str, baseline: Baseline, retune: Retune) -> Self {
        Self {
            name,
            resolver: Resolver::new(stable_id),
            baseline,
            retune,
            targets: Vec::new(),
        }
    }
    /// Adds a target
    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }
    /// Object resolved by the last reset, for installed hooks to read
    pub fn object(&self) -> Option<&ObjectRef> {
        self.resolver.object()
    }
}
impl Patch for RetunePatch {
    fn name(&self) -> &str {
        self.name
    }

    fn targets(&self) -> &[Target] {
        &self.targets
    }

    fn reset(&mut self, host: &dyn Host) {
        self.resolver.reset(host);
    }

    fn precondition(&self) -> Result<(), Rejection> {
        self.resolver.require()?;
        if self.resolver.matches(&self.baseline) {
            Ok(())
        } else {
            Err(Rejection::Precondition(self.resolver.stable_id().to_owned()))
        }
    }

    fn mutate(&mut self) {
        if let Some(object) = self.resolver.object() {
            let mut object = object.write().unwrap_or_else(|e| e.into_inner());
            object.set_primary(self.retune.primary_role, self.retune.primary_bonus);
        }
    }
}
