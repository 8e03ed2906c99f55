//! This module contains a patcher which adjusts memory permissions to patch read-only code

use std::convert::Infallible;
use std::mem;

use log::error;
use region::Protection;
use thiserror::Error;

use super::{PatchGuard, Patcher};

/// Errors when using permission patching
#[derive(Debug, Error)]
pub enum PermissionError<E> {
    /// Error when setting memory protections
    #[error("Error setting memory protections")]
    ProtectionError(#[from] region::Error),
    /// Custom error type from the underlying patcher
    #[error("{0}")]
    CustomError(E),
}
impl From<Infallible> for PermissionError<Infallible> {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

/// This struct wraps patchers to allow them to write to memory that's normally unwritable, such as function bodies.
/// It achieves this result by changing the memory permissions of the target memory, triggering the patch, and then reverting the permissions.
///
/// # Safety
///
/// `PermissionWrapper` relies on the size of the patch value to determine how many pages to change write permissions,
/// pairing `PermissionWrapper` with a patcher that writes more memory than the size of the patch is undefined behavior.
#[derive(Debug, Default)]
pub struct PermissionWrapper<P: Patcher> {
    /// Underlying patcher.
    patcher: P,
}
impl<P: Patcher> PermissionWrapper<P> {
    /// Creates a new PermissionWrapper
    pub fn new(patcher: P) -> Self {
        Self { patcher }
    }
}

unsafe impl<P> Patcher for PermissionWrapper<P>
where
    P: Patcher,
    PermissionError<P::Error>: From<P::Error>,
{
    type Error = PermissionError<P::Error>;
    type Guard = PermissionWrapperGuard<P::Guard>;

    unsafe fn patch(&self, location: *mut u8, patch: &[u8]) -> Result<Self::Guard, Self::Error> {
        let _guard = region::protect_with_handle(location, patch.len(), Protection::READ_WRITE_EXECUTE)?;
        self.patcher
            .patch(location, patch)
            .map(|g| PermissionWrapperGuard::guard(g, location, patch.len()))
            .map_err(Into::into)
    }
}

/// Permission guard for the underlying patch guard
pub struct PermissionWrapperGuard<G: PatchGuard> {
    /// Underlying patch guard for the wrapped patcher. `Option` so that we can drop it in our [`Drop::drop`] impl
    guard: Option<G>,
    /// Location of the patch
    location: *const u8,
    /// Length of the patch
    len: usize,
}
impl<G: PatchGuard> PermissionWrapperGuard<G> {
    /// Wrap a patcher's guard. When this guard is dropped, the underlying guard will also be dropped with its target location made writable
    fn guard(guard: G, location: *const u8, len: usize) -> Self {
        Self {
            guard: Some(guard),
            location,
            len,
        }
    }
}
unsafe impl<G: PatchGuard> PatchGuard for PermissionWrapperGuard<G> {}

impl<G: PatchGuard> Drop for PermissionWrapperGuard<G> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        // SAFETY: the location was made writable the same way when the patch was written
        match unsafe { region::protect_with_handle(self.location, self.len, Protection::READ_WRITE_EXECUTE) } {
            Ok(_handle) => guard.restore(),
            Err(e) => {
                // restoring into unwritable memory would fault, so the patch stays in place
                error!("can't restore {} bytes at {:p}: {e}", self.len, self.location);
                mem::forget(guard);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::slice;

    use region::Protection;

    use crate::patcher::byte::BytePatcher;
    use crate::patcher::mem::PermissionWrapper;
    use crate::patcher::PatchGuard;
    use crate::patcher::Patcher;

    #[test]
    /// Test patch and revert functionality
    fn test_patch() {
        let mut data = vec![1u8, 2, 3, 4];
        let ptr = data.as_mut_ptr();
        let size = data.len();

        // create the patcher and wrapper
        let wrapper = PermissionWrapper::new(BytePatcher::new());

        // patch the data
        let patch = unsafe { wrapper.patch(ptr, &[4, 3, 2, 1]).unwrap() };

        // make sure the data was actually changed
        assert_eq!(unsafe { slice::from_raw_parts(ptr, size) }, [4, 3, 2, 1]);

        // restore the patch
        patch.restore();

        // make sure the patch was restored
        assert_eq!(data, [1, 2, 3, 4]);
    }

    #[test]
    /// Tests to ensure permissions are actually set
    fn test_perms() {
        // Global immutables are stored in a read-only section in the binary.
        // Normally, writing to this global would result in a segfault, but PermissionWrapper changes the permissions to be writable so that no fault occurs
        static DATA: [u8; 4] = *b"1234";

        let ptr = DATA.as_ptr();
        let size = DATA.len();

        // make sure the data is definitely read-only
        for region in region::query_range(ptr, size).unwrap() {
            let region = region.unwrap();
            assert!(!region.is_guarded());
            assert_eq!(region.protection(), Protection::READ);
        }

        let wrapper = PermissionWrapper::new(BytePatcher::new());

        // patch the data
        let patch = unsafe { wrapper.patch(ptr as *mut u8, &[4, 3, 2, 1]).unwrap() };

        // make sure the data was actually changed
        assert_eq!(unsafe { slice::from_raw_parts(ptr, size) }, [4, 3, 2, 1]);

        // make sure permissions reverted correctly after the patch
        for region in region::query_range(ptr, size).unwrap() {
            let region = region.unwrap();
            assert_eq!(region.protection(), Protection::READ);
        }

        // restore the patch
        patch.restore();

        // make sure the patch was restored
        assert_eq!(unsafe { slice::from_raw_parts(ptr, size) }, *b"1234");

        // make sure permissions were restored
        for region in region::query_range(ptr, size).unwrap() {
            let region = region.unwrap();
            assert_eq!(region.protection(), Protection::READ);
        }
    }
}
