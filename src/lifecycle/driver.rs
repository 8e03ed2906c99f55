//! Runs every registered patch through its lifecycle, one after the other

use std::fmt::{self, Display};

use log::{debug, error, info};

use crate::host::Host;

use super::{ManagedPatch, PatchError, Rejection, Stage};

/// What happened to one patch during a run
#[derive(Debug)]
pub enum Outcome {
    /// Hooks were installed during this run
    Applied,
    /// Hooks were installed by an earlier run
    AlreadyApplied,
    /// The patch didn't fit the host and stayed inert
    Declined(Rejection),
    /// The patch fit but couldn't be installed
    Failed(PatchError),
}

/// Outcome of one patch
#[derive(Debug)]
pub struct Report {
    /// Name of the patch
    pub patch: String,
    /// What happened to it
    pub outcome: Outcome,
}
impl Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Applied => write!(f, "{}: applied", self.patch),
            Outcome::AlreadyApplied => write!(f, "{}: already applied", self.patch),
            Outcome::Declined(rejection) => write!(f, "{}: declined ({rejection})", self.patch),
            Outcome::Failed(e) => write!(f, "{}: failed ({e})", self.patch),
        }
    }
}

/// Owns the patches a host process wants applied
#[derive(Default)]
pub struct Driver {
    /// Patches in registration order
    patches: Vec<Box<dyn ManagedPatch>>,
}
impl Driver {
    /// Creates a driver with no patches
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds a patch to the end of the run order
    pub fn register<P: ManagedPatch + 'static>(&mut self, patch: P) {
        self.patches.push(Box::new(patch));
    }
    /// Registered patches in run order
    pub fn patches(&self) -> &[Box<dyn ManagedPatch>] {
        &self.patches
    }

    /// Resets, checks and applies every patch in order.
    ///
    /// One patch failing never stops the others.
    pub fn run(&mut self, host: &mut dyn Host) -> Vec<Report> {
        self.patches
            .iter_mut()
            .map(|patch| {
                let outcome = run_one(patch.as_mut(), &mut *host);
                let report = Report {
                    patch: patch.name().to_owned(),
                    outcome,
                };
                match report.outcome {
                    Outcome::Applied => info!("{report}"),
                    Outcome::AlreadyApplied | Outcome::Declined(_) => debug!("{report}"),
                    Outcome::Failed(_) => error!("{report}"),
                }
                report
            })
            .collect()
    }
}

/// Runs a single patch through reset, check and apply
fn run_one(patch: &mut dyn ManagedPatch, host: &mut dyn Host) -> Outcome {
    if patch.stage() == Stage::Applied {
        return Outcome::AlreadyApplied;
    }
    if let Err(e) = patch.reset(&*host) {
        return Outcome::Failed(e);
    }
    if let Err(rejection) = patch.check(&*host) {
        return Outcome::Declined(rejection);
    }
    match patch.apply(host) {
        Ok(()) => Outcome::Applied,
        Err(e) => Outcome::Failed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::{Driver, Outcome};
    use crate::instrument::{Callback, HookKind, Owner};
    use crate::lifecycle::{Lifecycle, Target};
    use crate::patches::hooks::HookPatch;
    use crate::testing::{known, MockHost, BOMBARD, TOOLTIP};

    /// Identity of the patches under test
    const ME: Owner = Owner::new("community");

    /// Single-hook patch on `function`
    fn patch(host: &MockHost, name: &'static str, function: &'static str) -> Lifecycle<HookPatch> {
        Lifecycle::new(
            ME,
            HookPatch::new(name).with_target(Target::new(
                function,
                known(host, function),
                HookKind::Postfix,
                Callback::new(0x1111),
            )),
        )
    }

    #[test]
    /// A failing patch doesn't stop the ones after it, and reruns skip applied patches
    fn test_run_continues() {
        let mut host = MockHost::new();
        host.add_function("Tooltip::SiegeEngine", 0x1000, TOOLTIP.to_vec());
        host.add_function("Siege::BombardHitEngine", 0x2000, BOMBARD.to_vec());
        host.add_function("Stats::MaxHitpoints", 0x3000, TOOLTIP.to_vec());

        let mut driver = Driver::new();
        driver.register(patch(&host, "Tooltip", "Tooltip::SiegeEngine"));
        driver.register(patch(&host, "Bombard", "Siege::BombardHitEngine"));
        driver.register(patch(&host, "Missing", "Stats::MinHitpoints"));
        driver.register(patch(&host, "Hitpoints", "Stats::MaxHitpoints"));
        host.fail_installs_at(0x2000);

        let reports = driver.run(&mut host);
        assert_eq!(reports.len(), 4);
        assert!(matches!(reports[0].outcome, Outcome::Applied));
        assert!(matches!(reports[1].outcome, Outcome::Failed(_)));
        assert!(matches!(reports[2].outcome, Outcome::Declined(_)));
        assert!(matches!(reports[3].outcome, Outcome::Applied));
        assert_eq!(reports[2].to_string(), "Missing: declined (function `Stats::MinHitpoints` is not registered)");

        let reports = driver.run(&mut host);
        assert!(matches!(reports[0].outcome, Outcome::AlreadyApplied));
        assert!(matches!(reports[1].outcome, Outcome::Failed(_)));
        assert!(matches!(reports[3].outcome, Outcome::AlreadyApplied));
        assert_eq!(host.installs(), 3 + 1);
        assert!(driver.patches().iter().filter(|p| p.is_applied()).count() == 2);
    }
}
