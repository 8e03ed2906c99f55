//! # Hook
//!
//! This module covers detours, which redirect execution from one location to another

pub mod jmp;

/// Trait for detours
///
/// # Safety
///
/// Detours are inherently unsafe; the implementor must restore the source when the guard goes away
pub unsafe trait Detour {
    /// Errors that could happen during a detour
    type Error;
    /// Detour guard to allow functions to be automatically restored when the guard goes out of scope
    type Guard: DetourGuard;

    /// Number of bytes written at the source
    fn len(&self) -> usize;

    /// Redirects `source` to `destination`.
    ///
    /// # Safety
    ///
    /// - `source` must be valid for writes of [`Detour::len`] bytes
    /// - `destination` must be valid executable code
    unsafe fn detour(
        &self,
        source: *const u8,
        destination: *const u8,
    ) -> Result<Self::Guard, Self::Error>;
}

/// Guard for a currently active detour
///
/// # Safety
///
/// Must ensure that the guard fully restores the source whether dropped or restored via `restore`
pub unsafe trait DetourGuard: Sized {
    /// Manually restores the source rather than letting the guard go out of scope
    fn restore(self) {
        // most guards will implement all functionality in [`Drop::drop`]
    }
}
