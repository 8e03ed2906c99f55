//! Machine code the native backend writes and recognizes

use iced_x86::FlowControl;

use crate::fingerprint::arch::{Architecture, X64};

/// Length of the redirect written by [`jmp_abs`]
pub const JMP_ABS_LEN: usize = 14;

/// Generates an absolute jump (`jmp [rip+0]` followed by the address) to `target`
pub fn jmp_abs(target: usize) -> [u8; JMP_ABS_LEN] {
    let mut code = [0u8; JMP_ABS_LEN];
    code[..6].copy_from_slice(&[0xff, 0x25, 0x00, 0x00, 0x00, 0x00]);
    code[6..].copy_from_slice(&(target as u64).to_le_bytes());
    code
}

/// Whether the first instruction of `body` sends execution somewhere else.
///
/// Inline hooks start with a jump or a breakpoint; so do some thunks, which get reported too.
pub fn starts_with_redirect(body: &[u8], address: usize) -> bool {
    let mut decoder = X64::decoder(body, address as u64);
    if !decoder.can_decode() {
        return false;
    }
    let instr = decoder.decode();
    matches!(
        instr.flow_control(),
        FlowControl::UnconditionalBranch | FlowControl::IndirectBranch | FlowControl::Interrupt
    )
}
