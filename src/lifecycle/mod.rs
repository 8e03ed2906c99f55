//! # Lifecycle
//!
//! This module covers the lifecycle every patch goes through:
//!
//! 1. `reset` re-resolves whatever the patch caches (`Fresh`/`Checked` -> `Checked`)
//! 2. `is_applicable` checks the patch's own precondition, then the fingerprint of every target,
//!    then every target for foreign hooks, stopping at the first failure
//! 3. `apply` installs one hook per target, all of them or none, exactly once (`Checked` -> `Applied`)
//!
//! A patch only describes what it targets and what it changes ([`Patch`]);
//! [`Lifecycle`] drives it and owns the applied state.

pub mod driver;

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::fingerprint::arch::{Architecture, X64};
use crate::fingerprint::registry::{matches_any, FingerprintSet};
use crate::fingerprint::{Fingerprint, FingerprintEngine};
use crate::host::{FunctionHandle, Host, UnresolvedTarget};
use crate::instrument::conflict::already_patched_by_others;
use crate::instrument::{Callback, HookId, HookInstallError, HookKind, HookRequest, Owner};

/// Reasons a patch declines to activate. None of these are failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    /// `is_applicable` was asked before the first `reset`
    #[error("patch has not been reset")]
    NotReset,
    /// A target function or domain object is missing
    #[error("{0}")]
    Unresolved(#[from] UnresolvedTarget),
    /// A domain object no longer has the configuration the patch expects
    #[error("domain object `{0}` no longer matches its baseline")]
    Precondition(String),
    /// A target compiles to a body the patch doesn't know
    #[error("`{target}` has unknown fingerprint {fingerprint}")]
    FingerprintMismatch {
        /// Target function
        target: String,
        /// Fingerprint of its current body
        fingerprint: Fingerprint,
    },
    /// A target is already hooked by someone else
    #[error("`{target}` is already hooked by {}", join_owners(.owners))]
    Conflict {
        /// Target function
        target: String,
        /// Everyone else hooking it
        owners: Vec<Owner>,
    },
}

/// Formats owners for [`Rejection::Conflict`]
fn join_owners(owners: &[Owner]) -> String {
    owners
        .iter()
        .map(Owner::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors that escalate out of the lifecycle
#[derive(Debug, Error)]
pub enum PatchError {
    /// `reset` was called on an applied patch
    #[error("patch was reset after being applied")]
    ResetAfterApply,
    /// `apply` was called on a patch that isn't applicable
    #[error("patch is not applicable: {0}")]
    Rejected(#[from] Rejection),
    /// The host refused to install a verified hook
    #[error("failed to hook `{target}`: {source}")]
    HookInstallation {
        /// Target function
        target: String,
        /// Host's reason
        source: HookInstallError,
    },
}

/// A function a patch hooks, and the bodies it is known to work with
#[derive(Debug, Clone)]
pub struct Target {
    /// Stable identifier of the function
    pub function: &'static str,
    /// Accepted fingerprints, one per host edition
    pub known: FingerprintSet,
    /// Hook to install once every check passes
    pub hook: HookRequest,
}
impl Target {
    /// Hooks `function` with `callback` if its body is in `known`
    pub fn new(function: &'static str, known: FingerprintSet, kind: HookKind, callback: Callback) -> Self {
        Self {
            function,
            known,
            hook: HookRequest { kind, callback },
        }
    }
}

/// A concrete behavior change.
///
/// Implementations are leaves: they describe targets and domain changes, never the lifecycle.
pub trait Patch {
    /// Name for diagnostics
    fn name(&self) -> &str;

    /// Functions this patch hooks
    fn targets(&self) -> &[Target];

    /// Re-resolves cached references. Missing objects leave the reference empty.
    fn reset(&mut self, _host: &dyn Host) {}

    /// Checks cached references against what the patch expects
    fn precondition(&self) -> Result<(), Rejection> {
        Ok(())
    }

    /// Changes domain objects directly.
    ///
    /// Runs on every successful `apply`, so it must set values rather than accumulate them.
    fn mutate(&mut self) {}
}

/// Where a patch is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Never reset
    Fresh,
    /// Reset at least once; applicability may be evaluated
    Checked,
    /// Hooks are installed. Terminal.
    Applied,
}

/// Lifecycle operations, object safe so the driver can hold any patch
pub trait ManagedPatch {
    /// Name for diagnostics
    fn name(&self) -> &str;
    /// Current stage
    fn stage(&self) -> Stage;
    /// Whether the hooks are installed
    fn is_applied(&self) -> bool {
        self.stage() == Stage::Applied
    }
    /// Re-resolves cached references. Not allowed once applied.
    fn reset(&mut self, host: &dyn Host) -> Result<(), PatchError>;
    /// Evaluates applicability, reporting why the patch declines
    fn check(&self, host: &dyn Host) -> Result<(), Rejection>;
    /// Evaluates applicability
    fn is_applicable(&self, host: &dyn Host) -> bool {
        self.check(host).is_ok()
    }
    /// Applies the patch. Idempotent.
    fn apply(&mut self, host: &mut dyn Host) -> Result<(), PatchError>;
}

/// Drives a [`Patch`] through its lifecycle on behalf of `owner`
pub struct Lifecycle<P, A: Architecture = X64> {
    /// Identity hooks are installed under
    owner: Owner,
    /// The behavior being applied
    patch: P,
    /// Current stage
    stage: Stage,
    /// Engine used for target fingerprints
    engine: FingerprintEngine<A>,
}
impl<P: Patch> Lifecycle<P> {
    /// Wraps a fresh patch whose targets are x64 code
    pub fn new(owner: Owner, patch: P) -> Self {
        Self::with_arch(owner, patch)
    }
}
impl<P: Patch, A: Architecture> Lifecycle<P, A> {
    /// Wraps a fresh patch whose targets are code of architecture `A`
    pub fn with_arch(owner: Owner, patch: P) -> Self {
        Self {
            owner,
            patch,
            stage: Stage::Fresh,
            engine: FingerprintEngine::new(),
        }
    }
    /// The wrapped patch
    pub fn patch(&self) -> &P {
        &self.patch
    }
    /// Identity hooks are installed under
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// Current fingerprint of every target, for registering new host editions
    pub fn fingerprints(&self, host: &dyn Host) -> Vec<(&'static str, Result<Fingerprint, UnresolvedTarget>)> {
        self.patch
            .targets()
            .iter()
            .map(|target| {
                let fp = resolve_function(host, target.function)
                    .and_then(|handle| self.engine.fingerprint(host, &handle));
                (target.function, fp)
            })
            .collect()
    }

    /// Verifies every target, returning their handles in target order
    fn verify(&self, host: &dyn Host) -> Result<Vec<FunctionHandle>, Rejection> {
        if self.stage == Stage::Fresh {
            return Err(Rejection::NotReset);
        }
        self.patch.precondition()?;

        let targets = self.patch.targets();
        let handles = targets
            .iter()
            .map(|target| resolve_function(host, target.function))
            .collect::<Result<Vec<_>, _>>()?;

        for (target, handle) in targets.iter().zip(&handles) {
            let fingerprint = self.engine.fingerprint(host, handle)?;
            if !matches_any(&fingerprint, &target.known) {
                return Err(Rejection::FingerprintMismatch {
                    target: target.function.to_owned(),
                    fingerprint,
                });
            }
        }

        for (target, handle) in targets.iter().zip(&handles) {
            let record = host.instrumentation(handle);
            if already_patched_by_others(&record, &self.owner) {
                return Err(Rejection::Conflict {
                    target: target.function.to_owned(),
                    owners: record.foreign_owners(&self.owner),
                });
            }
        }

        Ok(handles)
    }
}

/// Looks up a target function by its stable identifier
fn resolve_function(host: &dyn Host, id: &str) -> Result<FunctionHandle, UnresolvedTarget> {
    host.function(id)
        .ok_or_else(|| UnresolvedTarget::FunctionMissing { id: id.to_owned() })
}

impl<P: Patch, A: Architecture> ManagedPatch for Lifecycle<P, A> {
    fn name(&self) -> &str {
        self.patch.name()
    }

    fn stage(&self) -> Stage {
        self.stage
    }

    fn reset(&mut self, host: &dyn Host) -> Result<(), PatchError> {
        if self.stage == Stage::Applied {
            warn!("[{}] reset after apply", self.patch.name());
            return Err(PatchError::ResetAfterApply);
        }
        self.patch.reset(host);
        self.stage = Stage::Checked;
        Ok(())
    }

    fn check(&self, host: &dyn Host) -> Result<(), Rejection> {
        self.verify(host).map(|_| ()).map_err(|rejection| {
            debug!("[{}] not applicable: {}", self.patch.name(), rejection);
            rejection
        })
    }

    fn apply(&mut self, host: &mut dyn Host) -> Result<(), PatchError> {
        if self.stage == Stage::Applied {
            self.patch.mutate();
            return Ok(());
        }

        let handles = self.verify(&*host)?;

        let mut installed: Vec<(FunctionHandle, HookId)> = Vec::with_capacity(handles.len());
        for (target, handle) in self.patch.targets().iter().zip(&handles) {
            match host.install_hook(handle, &self.owner, target.hook) {
                Ok(id) => installed.push((*handle, id)),
                Err(source) => {
                    error!(
                        "[{}] failed to hook `{}`: {}, removing {} installed hook(s)",
                        self.patch.name(),
                        target.function,
                        source,
                        installed.len()
                    );
                    // never leave a patch half installed, and only undo what this apply did
                    for (handle, id) in &installed {
                        host.remove_hook(handle, *id);
                    }
                    return Err(PatchError::HookInstallation {
                        target: target.function.to_owned(),
                        source,
                    });
                }
            }
        }

        self.patch.mutate();
        self.stage = Stage::Applied;
        info!(
            "[{}] applied, {} hook(s) installed as `{}`",
            self.patch.name(),
            installed.len(),
            self.owner
        );
        Ok(())
    }
}
