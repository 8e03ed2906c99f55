//! # Domain
//!
//! This module covers domain objects: tunable balance entities owned by the host and looked up
//! by an identifier that stays the same across host editions, even when names get localized.

pub mod resolver;

use std::sync::{Arc, RwLock};

/// Who benefits from an object's bonus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// No role
    None,
    /// The character itself
    Personal,
    /// Leader of the party
    PartyLeader,
    /// Every member of the party
    PartyMember,
    /// Commander of the army
    ArmyCommander,
    /// Leader of the clan
    ClanLeader,
    /// Governor of a settlement
    Governor,
    /// Party's captain
    Captain,
    /// Party's engineer
    Engineer,
    /// Party's scout
    Scout,
    /// Party's surgeon
    Surgeon,
    /// Party's quartermaster
    Quartermaster,
}

/// How a bonus combines with the value it modifies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Increment {
    /// Added as-is
    Add,
    /// Added as a factor of the base value
    AddFactor,
}

/// The complete configuration of a [`DomainObject`]
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceFields {
    /// Display name, possibly localized
    pub name: String,
    /// Display description, possibly localized
    pub description: String,
    /// Skill the object belongs to
    pub skill: String,
    /// Skill value needed before the object takes effect
    pub required_value: u32,
    /// Mutually exclusive alternative, by stable identifier
    pub alternative: Option<String>,
    /// Primary beneficiary
    pub primary_role: Role,
    /// Primary bonus
    pub primary_bonus: f32,
    /// Secondary beneficiary
    pub secondary_role: Role,
    /// Secondary bonus
    pub secondary_bonus: f32,
    /// How the bonuses combine
    pub increment: Increment,
}

/// A versioned balance entity owned by the host
#[derive(Debug, Clone, PartialEq)]
pub struct DomainObject {
    /// Identifier that is constant across host editions
    stable_id: String,
    /// Current configuration
    fields: BalanceFields,
}
impl DomainObject {
    /// Creates an object with its initial configuration
    pub fn new(stable_id: impl Into<String>, fields: BalanceFields) -> Self {
        Self {
            stable_id: stable_id.into(),
            fields,
        }
    }
    /// Identifier that is constant across host editions
    pub fn stable_id(&self) -> &str {
        &self.stable_id
    }
    /// Current configuration
    pub fn fields(&self) -> &BalanceFields {
        &self.fields
    }
    /// Replaces the whole configuration at once
    pub fn initialize(&mut self, fields: BalanceFields) {
        self.fields = fields;
    }
    /// Re-initializes with a new primary role and bonus, keeping everything else
    pub fn set_primary(&mut self, role: Role, bonus: f32) {
        let fields = BalanceFields {
            primary_role: role,
            primary_bonus: bonus,
            ..self.fields.clone()
        };
        self.initialize(fields);
    }
}

/// Shared reference into a host-managed table.
///
/// Installed hooks read through it from whatever thread the host calls them on.
pub type ObjectRef = Arc<RwLock<DomainObject>>;

/// The host's domain object tables
pub trait ObjectTables {
    /// First object `predicate` accepts
    fn find_first(&self, predicate: &dyn Fn(&DomainObject) -> bool) -> Option<ObjectRef>;
}

/// In-process object table
#[derive(Debug, Default)]
pub struct ObjectTable {
    /// Objects in load order
    objects: Vec<ObjectRef>,
}
impl ObjectTable {
    /// Creates an empty table
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds `object`, returning the shared reference to it
    pub fn insert(&mut self, object: DomainObject) -> ObjectRef {
        let object = Arc::new(RwLock::new(object));
        self.objects.push(object.clone());
        object
    }
    /// Drops every object, e.g. when the host reloads its tables
    pub fn clear(&mut self) {
        self.objects.clear();
    }
}
impl ObjectTables for ObjectTable {
    fn find_first(&self, predicate: &dyn Fn(&DomainObject) -> bool) -> Option<ObjectRef> {
        self.objects
            .iter()
            .find(|object| {
                let object = object.read().unwrap_or_else(|e| e.into_inner());
                predicate(&object)
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::{ObjectTable, ObjectTables, Role};
    use crate::testing::healthy_scout;

    #[test]
    /// `set_primary` replaces only the primary role and bonus
    fn test_set_primary() {
        let mut object = healthy_scout();
        let before = object.fields().clone();
        object.set_primary(Role::Personal, 8.0);

        assert_eq!(object.fields().primary_role, Role::Personal);
        assert_eq!(object.fields().primary_bonus, 8.0);
        assert_eq!(object.fields().name, before.name);
        assert_eq!(object.fields().alternative, before.alternative);
        assert_eq!(object.stable_id(), "dDKOoD3e");
    }

    #[test]
    /// Lookups return the shared object, so changes through one reference show through all
    fn test_find_first_shares() {
        let mut table = ObjectTable::new();
        let inserted = table.insert(healthy_scout());

        let found = table.find_first(&|o| o.stable_id() == "dDKOoD3e").unwrap();
        found.write().unwrap().set_primary(Role::Personal, 8.0);

        assert_eq!(inserted.read().unwrap().fields().primary_role, Role::Personal);
        assert!(table.find_first(&|o| o.stable_id() == "LyVZYGkN").is_none());
    }
}
