//! Host backed by the current process: functions are registered by address, bodies are read
//! straight out of memory and hooks are written inline.

use log::debug;

use crate::domain::{DomainObject, ObjectRef, ObjectTable, ObjectTables};
use crate::instrument::native::{self, NativeInstrumentation};
use crate::instrument::{HookId, HookInstallError, HookRequest, Instrumentation, InstrumentationRecord, Owner};
use crate::patcher::byte::BytePatcher;
use crate::patcher::mem::PermissionWrapper;
use crate::patcher::Patcher;

use super::{BodyAccess, FunctionHandle, FunctionTable, Functions, UnresolvedTarget};

/// The current process as a host.
///
/// Only functions registered through [`NativeHost::register_function`] are ever read or hooked.
pub struct NativeHost<P: Patcher = PermissionWrapper<BytePatcher>> {
    /// Registered functions
    functions: FunctionTable,
    /// Domain objects
    objects: ObjectTable,
    /// Inline hooks on registered functions
    instrumentation: NativeInstrumentation<P>,
}
impl NativeHost {
    /// Creates a host that lifts page protections while it writes hooks
    pub fn new() -> Self {
        Self::with_patcher(PermissionWrapper::new(BytePatcher::new()))
    }
}
impl Default for NativeHost {
    fn default() -> Self {
        Self::new()
    }
}
impl<P: Patcher> NativeHost<P> {
    /// Creates a host writing hooks through `patcher`
    pub fn with_patcher(patcher: P) -> Self {
        Self {
            functions: FunctionTable::new(),
            objects: ObjectTable::new(),
            // Safety: only registered handles are passed on, and registering is unsafe
            instrumentation: unsafe { NativeInstrumentation::with_patcher(patcher) },
        }
    }

    /// Registers the function at `address` under `id`
    ///
    /// # Safety
    ///
    /// - `address` must be the start of a function whose compiled body is `size` bytes long
    /// - the body must stay mapped for as long as this host exists
    /// - every callback hooked onto the function must have the same signature
    pub unsafe fn register_function(&mut self, id: impl Into<String>, address: *const u8, size: usize) -> FunctionHandle {
        let id = id.into();
        let handle = FunctionHandle::new(address as usize, size);
        debug!("registered `{id}` at {handle}");
        self.functions.register(id, handle);
        handle
    }
    /// Domain objects
    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }
    /// Domain objects, for loading and reloading
    pub fn objects_mut(&mut self) -> &mut ObjectTable {
        &mut self.objects
    }
}

impl<P: Patcher> Functions for NativeHost<P> {
    fn function(&self, id: &str) -> Option<FunctionHandle> {
        self.functions.function(id)
    }
}
impl<P: Patcher> BodyAccess for NativeHost<P> {
    fn read_body(&self, handle: &FunctionHandle) -> Result<Vec<u8>, UnresolvedTarget> {
        if !self.functions.is_registered(handle) {
            return Err(UnresolvedTarget::BodyUnreadable {
                address: handle.address(),
                size: handle.size(),
            });
        }
        // Safety: registered bodies stay mapped
        unsafe { native::read_body(handle) }
    }
}
impl<P> Instrumentation for NativeHost<P>
where
    P: Patcher,
    P::Error: Into<HookInstallError>,
{
    fn instrumentation(&self, handle: &FunctionHandle) -> InstrumentationRecord {
        if !self.functions.is_registered(handle) {
            return InstrumentationRecord::new();
        }
        self.instrumentation.instrumentation(handle)
    }

    fn install_hook(
        &mut self,
        handle: &FunctionHandle,
        owner: &Owner,
        hook: HookRequest,
    ) -> Result<HookId, HookInstallError> {
        if !self.functions.is_registered(handle) {
            return Err(HookInstallError::Unregistered(handle.address()));
        }
        self.instrumentation.install_hook(handle, owner, hook)
    }

    fn remove_hook(&mut self, handle: &FunctionHandle, id: HookId) {
        self.instrumentation.remove_hook(handle, id);
    }
}
impl<P: Patcher> ObjectTables for NativeHost<P> {
    fn find_first(&self, predicate: &dyn Fn(&DomainObject) -> bool) -> Option<ObjectRef> {
        self.objects.find_first(predicate)
    }
}
