//! Inline hooks on functions of the current process.
//!
//! Only [`HookKind::Replace`] is supported: the start of the body is overwritten with an absolute
//! jump to the callback, and restored when the hook is removed or the instrumentation dropped.
//! A body that already starts with a jump we didn't write is reported as a foreign hook.

use std::collections::HashMap;
use std::convert::Infallible;
use std::slice;
use std::sync::{Arc, Mutex, PoisonError};

use lazy_static::lazy_static;
use log::{debug, trace};

use crate::code::x64::starts_with_redirect;
use crate::hook::jmp::{JmpDetour, JmpDetourGuard};
use crate::hook::{Detour, DetourGuard};
use crate::host::{FunctionHandle, UnresolvedTarget};
use crate::patcher::byte::BytePatcher;
use crate::patcher::mem::{PermissionError, PermissionWrapper};
use crate::patcher::{PatchGuard, Patcher};

use super::{HookId, HookInstallError, HookKind, HookRequest, Instrumentation, InstrumentationRecord, Owner};

lazy_static! {
    /// Install locks keyed by function address, shared by every instrumentation in the process
    static ref TARGET_LOCKS: Mutex<HashMap<usize, Arc<Mutex<()>>>> = Mutex::new(HashMap::new());
}

/// Runs `f` while holding the install lock of `address`.
///
/// The lock leaves the table again once nobody holds or waits on it, so the table only ever
/// holds addresses that are being hooked or unhooked right now.
fn with_target_lock<T>(address: usize, f: impl FnOnce() -> T) -> T {
    let lock = TARGET_LOCKS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(address)
        .or_default()
        .clone();
    let result = {
        let _locked = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    };

    // clones are only made under the table lock, so an unshared entry can't be picked up concurrently
    let mut locks = TARGET_LOCKS.lock().unwrap_or_else(PoisonError::into_inner);
    drop(lock);
    if locks.get(&address).map_or(false, |lock| Arc::strong_count(lock) == 1) {
        locks.remove(&address);
    }
    result
}

impl From<Infallible> for HookInstallError {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}
impl From<PermissionError<Infallible>> for HookInstallError {
    fn from(e: PermissionError<Infallible>) -> Self {
        match e {
            PermissionError::ProtectionError(e) => Self::Protection(e),
            PermissionError::CustomError(e) => match e {},
        }
    }
}

/// Error for a body that can't be read
fn unreadable(handle: &FunctionHandle) -> UnresolvedTarget {
    UnresolvedTarget::BodyUnreadable {
        address: handle.address(),
        size: handle.size(),
    }
}

/// Copies the body behind `handle` out of the current process.
///
/// Every page of the body must be mapped and readable, otherwise the body is reported unreadable
/// instead of faulting.
///
/// # Safety
///
/// The body must stay mapped for the duration of the call
pub unsafe fn read_body(handle: &FunctionHandle) -> Result<Vec<u8>, UnresolvedTarget> {
    let start = handle.address();
    let end = match start.checked_add(handle.size()) {
        Some(end) if handle.size() > 0 => end,
        _ => return Err(unreadable(handle)),
    };

    let regions = region::query_range(start as *const u8, handle.size()).map_err(|_| unreadable(handle))?;
    let mut covered = start;
    for region in regions {
        let region = region.map_err(|_| unreadable(handle))?;
        let range = region.as_range();
        if range.start > covered || !region.is_readable() || region.is_guarded() {
            return Err(unreadable(handle));
        }
        covered = range.end;
        if covered >= end {
            break;
        }
    }
    if covered < end {
        return Err(unreadable(handle));
    }

    // Safety: every byte of the range was just checked to be mapped and readable
    Ok(slice::from_raw_parts(start as *const u8, handle.size()).to_vec())
}

/// A hook this instrumentation installed
struct Installed<G: PatchGuard> {
    /// Id handed out on install
    id: HookId,
    /// Who installed it
    owner: Owner,
    /// Where it intercepts
    kind: HookKind,
    /// Restores the body when dropped
    guard: JmpDetourGuard<G>,
}

/// Installs inline hooks in the current process
pub struct NativeInstrumentation<P: Patcher = PermissionWrapper<BytePatcher>> {
    /// Detour used to redirect bodies to callbacks
    detour: JmpDetour<P>,
    /// Installed hooks keyed by function address
    installed: HashMap<usize, Installed<P::Guard>>,
    /// Id handed to the next installed hook
    next_id: u64,
}
impl NativeInstrumentation {
    /// Creates an instrumentation that lifts page protections while it writes
    ///
    /// # Safety
    ///
    /// See [`NativeInstrumentation::with_patcher`]
    pub unsafe fn new() -> Self {
        Self::with_patcher(PermissionWrapper::new(BytePatcher::new()))
    }
}
impl<P: Patcher> NativeInstrumentation<P> {
    /// Creates an instrumentation writing through `patcher`
    ///
    /// # Safety
    ///
    /// Every handle passed to this instrumentation must describe the mapped body of a real function,
    /// and that body must stay mapped for as long as a hook is installed on it.
    /// Callbacks must be functions with the same signature as the function they replace.
    pub unsafe fn with_patcher(patcher: P) -> Self {
        Self {
            detour: JmpDetour::new(patcher),
            installed: HashMap::new(),
            next_id: 0,
        }
    }
    /// Number of hooks currently installed
    pub fn len(&self) -> usize {
        self.installed.len()
    }
    /// Whether no hooks are installed
    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }
}

impl<P> Instrumentation for NativeInstrumentation<P>
where
    P: Patcher,
    P::Error: Into<HookInstallError>,
{
    fn instrumentation(&self, handle: &FunctionHandle) -> InstrumentationRecord {
        let mut record = InstrumentationRecord::new();
        if let Some(installed) = self.installed.get(&handle.address()) {
            record.push(installed.owner.clone(), installed.kind);
            return record;
        }
        // Safety: handles are valid per the constructor's contract
        if let Ok(body) = unsafe { read_body(handle) } {
            if starts_with_redirect(&body, handle.address()) {
                record.push(Owner::unknown(), HookKind::Replace);
            }
        }
        record
    }

    fn install_hook(
        &mut self,
        handle: &FunctionHandle,
        owner: &Owner,
        hook: HookRequest,
    ) -> Result<HookId, HookInstallError> {
        if hook.kind != HookKind::Replace {
            return Err(HookInstallError::UnsupportedKind(hook.kind));
        }
        if handle.size() < self.detour.len() {
            return Err(HookInstallError::BodyTooSmall {
                size: handle.size(),
                needed: self.detour.len(),
            });
        }
        with_target_lock(handle.address(), || self.install_locked(handle, owner, hook))
    }

    fn remove_hook(&mut self, handle: &FunctionHandle, id: HookId) {
        with_target_lock(handle.address(), || {
            let ours = self
                .installed
                .get(&handle.address())
                .map_or(false, |installed| installed.id == id);
            if !ours {
                return;
            }
            if let Some(installed) = self.installed.remove(&handle.address()) {
                installed.guard.restore();
                debug!("`{}` unhooked {handle}", installed.owner);
            }
        });
    }
}

impl<P> NativeInstrumentation<P>
where
    P: Patcher,
    P::Error: Into<HookInstallError>,
{
    /// Writes the redirect. The caller holds the install lock of `handle`.
    fn install_locked(
        &mut self,
        handle: &FunctionHandle,
        owner: &Owner,
        hook: HookRequest,
    ) -> Result<HookId, HookInstallError> {
        if let Some(installed) = self.installed.get(&handle.address()) {
            return Err(if installed.owner == *owner {
                HookInstallError::AlreadyInstalled(owner.clone())
            } else {
                HookInstallError::Conflict(installed.owner.clone())
            });
        }
        // Safety: handles are valid per the constructor's contract
        let body = unsafe { read_body(handle) }.map_err(|e| HookInstallError::Patch(e.to_string()))?;
        if starts_with_redirect(&body, handle.address()) {
            return Err(HookInstallError::Conflict(Owner::unknown()));
        }

        // Safety: the body holds at least `detour.len()` bytes and the callback is a valid function,
        // both per the constructor's contract
        let guard = unsafe {
            self.detour
                .detour(handle.address() as *const u8, hook.callback.address() as *const u8)
        }
        .map_err(Into::<HookInstallError>::into)?;
        trace!("redirected {handle} to {:#x}", hook.callback.address());

        let id = HookId::new(self.next_id);
        self.next_id += 1;
        self.installed.insert(
            handle.address(),
            Installed {
                id,
                owner: owner.clone(),
                kind: hook.kind,
                guard,
            },
        );
        debug!("`{owner}` hooked {handle}");
        Ok(id)
    }
}
