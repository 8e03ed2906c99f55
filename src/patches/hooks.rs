//! Patch that only installs hooks

use crate::lifecycle::{Patch, Target};

/// Hooks its targets and changes nothing else
#[derive(Debug, Clone)]
pub struct HookPatch {
    /// Name for diagnostics
    name: &'static str,
    /// Functions to hook
    targets: Vec<Target>,
}
impl HookPatch {
    /// Creates a patch with no targets yet
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            targets: Vec::new(),
        }
    }
    /// Adds a target
    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }
}
impl Patch for HookPatch {
    fn name(&self) -> &str {
        self.name
    }
    fn targets(&self) -> &[Target] {
        &self.targets
    }
}
