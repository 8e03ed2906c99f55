//! # Jump Detour
//!
//! This detour overwrites the start of the source with an absolute `jmp`

use crate::code::x64::{jmp_abs, JMP_ABS_LEN};
use crate::patcher::{PatchGuard, Patcher};

use super::{Detour, DetourGuard};

/// Simple jmp detour
pub struct JmpDetour<P> {
    /// Underlying patcher used to write the jump
    patcher: P,
}
impl<P: Patcher> JmpDetour<P> {
    /// Creates a new jmp detour
    pub fn new(patcher: P) -> Self {
        Self { patcher }
    }
}
unsafe impl<P: Patcher> Detour for JmpDetour<P> {
    type Error = P::Error;
    type Guard = JmpDetourGuard<P::Guard>;

    fn len(&self) -> usize {
        JMP_ABS_LEN
    }

    unsafe fn detour(
        &self,
        source: *const u8,
        destination: *const u8,
    ) -> Result<Self::Guard, Self::Error> {
        // patch with an absolute jmp to the destination
        let guard = self
            .patcher
            .patch(source as _, &jmp_abs(destination as _))?;

        Ok(JmpDetourGuard { guard })
    }
}

/// Guard for jmp detours
pub struct JmpDetourGuard<G: PatchGuard> {
    /// Underlying patch guard that we're wrapping
    guard: G,
}
impl<G: PatchGuard> JmpDetourGuard<G> {
    /// Get the underlying patch guard in case info is needed
    pub fn patch(&self) -> &G {
        &self.guard
    }
}
unsafe impl<G: PatchGuard> DetourGuard for JmpDetourGuard<G> {}

#[cfg(test)]
mod tests {
    use super::JmpDetour;
    use crate::code::x64::jmp_abs;
    use crate::hook::{Detour, DetourGuard};
    use crate::patcher::byte::BytePatcher;

    #[test]
    /// The source starts with the jump while detoured and is restored afterwards
    fn test_detour() {
        let mut body = vec![0x90u8; 16];
        let ptr = body.as_mut_ptr();

        let detour = JmpDetour::new(BytePatcher::new());
        let guard = unsafe { detour.detour(ptr, 0x1234 as *const u8).unwrap() };
        assert_eq!(unsafe { std::slice::from_raw_parts(ptr, 14) }, jmp_abs(0x1234));
        assert_eq!(unsafe { *ptr.add(14) }, 0x90);

        guard.restore();
        assert_eq!(body, vec![0x90u8; 16]);
    }
}
