//! # Instrument
//!
//! This module covers instrumentation: who has hooked a function, and how a new hook gets installed.
//! Hook dispatch itself belongs to the host; the core only asks and registers.

pub mod conflict;
#[cfg(target_arch = "x86_64")]
pub mod native;

use std::borrow::Cow;
use std::fmt::{self, Display};

use thiserror::Error;

use crate::host::FunctionHandle;

/// Identity of whoever installed a hook
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Owner(Cow<'static, str>);
impl Owner {
    /// Owner with a static identity
    pub const fn new(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }
    /// Owner for hooks nobody has claimed
    pub const fn unknown() -> Self {
        Self::new("<unknown>")
    }
    /// Owner identity as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<String> for Owner {
    fn from(id: String) -> Self {
        Self(Cow::Owned(id))
    }
}
impl Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a hook intercepts the function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Runs before the function, may alter its inputs
    Prefix,
    /// Runs after the function, may alter its result
    Postfix,
    /// Runs instead of the function
    Replace,
}

/// Address of the replacement behavior a hook dispatches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Callback(usize);
impl Callback {
    /// Callback at `address`
    pub const fn new(address: usize) -> Self {
        Self(address)
    }
    /// Callback for a function pointer, e.g. `Callback::from_ptr(postfix as *const ())`
    pub fn from_ptr(ptr: *const ()) -> Self {
        Self(ptr as usize)
    }
    /// Address of the callback
    pub const fn address(&self) -> usize {
        self.0
    }
}

/// Identifies one installed hook, so that removing it leaves every other hook alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);
impl HookId {
    /// Wraps an id handed out by the instrumentation
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
    /// Raw id
    pub const fn get(&self) -> u64 {
        self.0
    }
}

/// A hook a patch wants installed on one of its targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookRequest {
    /// Where the hook intercepts
    pub kind: HookKind,
    /// What it dispatches to
    pub callback: Callback,
}

/// One hook currently intercepting a function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookEntry {
    /// Who installed it
    pub owner: Owner,
    /// Where it intercepts
    pub kind: HookKind,
}

/// Current instrumentation of a function, as reported by the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentationRecord {
    /// Installed hooks in installation order
    entries: Vec<HookEntry>,
}
impl InstrumentationRecord {
    /// Record of an uninstrumented function
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds an installed hook
    pub fn push(&mut self, owner: Owner, kind: HookKind) {
        self.entries.push(HookEntry { owner, kind });
    }
    /// Installed hooks
    pub fn entries(&self) -> &[HookEntry] {
        &self.entries
    }
    /// Whether nothing intercepts the function
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    /// Distinct owners other than `me`, in installation order
    pub fn foreign_owners(&self, me: &Owner) -> Vec<Owner> {
        let mut owners: Vec<Owner> = Vec::new();
        for entry in self.entries.iter().filter(|e| e.owner != *me) {
            if !owners.contains(&entry.owner) {
                owners.push(entry.owner.clone());
            }
        }
        owners
    }
}

/// Errors that could happen when installing a hook
#[derive(Debug, Error)]
pub enum HookInstallError {
    /// The host can't intercept the function this way
    #[error("{0:?} hooks are not supported by this host")]
    UnsupportedKind(HookKind),
    /// The body is too short to hold the redirect
    #[error("body of {size} bytes can't hold a {needed} byte redirect")]
    BodyTooSmall {
        /// Size of the body
        size: usize,
        /// Bytes the redirect needs
        needed: usize,
    },
    /// The owner already hooks the function
    #[error("`{0}` already hooks this function")]
    AlreadyInstalled(Owner),
    /// Someone else hooked the function between the check and the install
    #[error("function is already instrumented by `{0}`")]
    Conflict(Owner),
    /// Error when setting memory protections
    #[error("Error setting memory protections")]
    Protection(#[from] region::Error),
    /// The handle was never registered with the host
    #[error("function at {0:#x} is not registered")]
    Unregistered(usize),
    /// Host-specific failure
    #[error("{0}")]
    Patch(String),
}

/// The host's instrumentation subsystem
pub trait Instrumentation {
    /// Reports every hook currently intercepting `handle`
    fn instrumentation(&self, handle: &FunctionHandle) -> InstrumentationRecord;

    /// Installs a single hook on `handle` on behalf of `owner`, returning its id
    fn install_hook(
        &mut self,
        handle: &FunctionHandle,
        owner: &Owner,
        hook: HookRequest,
    ) -> Result<HookId, HookInstallError>;

    /// Removes the hook `id` from `handle`. Unknown ids are ignored.
    fn remove_hook(&mut self, handle: &FunctionHandle, id: HookId);
}
