//! # Fingerprint
//!
//! This module covers fingerprinting, which digests a function's compiled body so that
//! a patch can tell whether the host still ships the code it was written against.
//!
//! The digest is independent of where the host loaded the function: operands that encode
//! a position (branches leaving the body, RIP-relative and absolute memory displacements)
//! are masked before hashing, everything else is hashed as-is.

pub mod arch;
pub mod registry;

use std::fmt::{self, Debug, Display};
use std::marker::PhantomData;

use iced_x86::{Code, Instruction, OpKind, Register};
use sha2::{Digest, Sha256};

use crate::host::{BodyAccess, FunctionHandle, UnresolvedTarget};

use self::arch::{Architecture, X64};

/// SHA-256 digest of a canonicalized function body
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);
impl Fingerprint {
    /// Wraps a raw digest
    pub const fn new(digest: [u8; 32]) -> Self {
        Self(digest)
    }
    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}
impl Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
impl Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// Computes fingerprints for code of architecture `A`
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintEngine<A: Architecture = X64> {
    /// Placeholder for architecture
    _arch: PhantomData<A>,
}
impl<A: Architecture> FingerprintEngine<A> {
    /// Creates a new engine
    pub fn new() -> Self {
        Self { _arch: PhantomData }
    }

    /// Fingerprints the body behind `handle`.
    ///
    /// Fails with [`UnresolvedTarget`] if the host can't hand over the body.
    pub fn fingerprint<B>(&self, host: &B, handle: &FunctionHandle) -> Result<Fingerprint, UnresolvedTarget>
    where
        B: BodyAccess + ?Sized,
    {
        if handle.size() == 0 {
            return Err(UnresolvedTarget::BodyUnreadable {
                address: handle.address(),
                size: 0,
            });
        }
        let body = host.read_body(handle)?;
        Ok(self.fingerprint_bytes(&body, handle.address()))
    }

    /// Fingerprints `body` as if it had been loaded at `address`
    pub fn fingerprint_bytes(&self, body: &[u8], address: usize) -> Fingerprint {
        let bounds = FunctionHandle::new(address, body.len());
        let mut decoder = A::decoder(body, address as u64);
        let mut instr = Instruction::default();
        let mut canonical = Vec::with_capacity(16);
        let mut hasher = Sha256::new();

        while decoder.can_decode() {
            let start = decoder.position();
            decoder.decode_out(&mut instr);
            let end = decoder.position();

            canonical.clear();
            canonical.extend_from_slice(&body[start..end]);

            // undecodable bytes are hashed verbatim
            if instr.code() != Code::INVALID {
                let offsets = decoder.get_constant_offsets(&instr);
                if leaves_body(&instr, &bounds) && offsets.has_immediate() {
                    mask(&mut canonical, offsets.immediate_offset(), offsets.immediate_size());
                }
                if has_positional_memory(&instr) && offsets.has_displacement() {
                    mask(
                        &mut canonical,
                        offsets.displacement_offset(),
                        offsets.displacement_size(),
                    );
                }
            }
            hasher.update(&canonical);
        }

        Fingerprint(hasher.finalize().into())
    }
}

/// Whether `instr` is a relative branch to somewhere outside `bounds`
fn leaves_body(instr: &Instruction, bounds: &FunctionHandle) -> bool {
    matches!(
        instr.op0_kind(),
        OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64
    ) && !bounds.contains(instr.near_branch_target())
}

/// Whether `instr` addresses memory relative to the instruction pointer or by absolute address
fn has_positional_memory(instr: &Instruction) -> bool {
    let addresses_memory = (0..instr.op_count()).any(|i| instr.op_kind(i) == OpKind::Memory);
    addresses_memory
        && (instr.is_ip_rel_memory_operand()
            || (instr.memory_base() == Register::None && instr.memory_index() == Register::None))
}

/// Zeroes `size` bytes of `bytes` starting at `offset`
fn mask(bytes: &mut [u8], offset: usize, size: usize) {
    bytes[offset..offset + size].fill(0);
}

#[cfg(test)]
mod tests {
    use super::arch::X86;
    use super::FingerprintEngine;
    use crate::host::{FunctionHandle, UnresolvedTarget};
    use crate::testing::MockHost;

    /// push rbp; mov rbp, rsp; call rel32; mov rax, [rip+disp32]; add eax, 1; je +0; pop rbp; ret
    fn body(call: u32, disp: u32, addend: u8, je: u8) -> Vec<u8> {
        let mut body = vec![0x55, 0x48, 0x89, 0xe5, 0xe8];
        body.extend_from_slice(&call.to_le_bytes());
        body.extend_from_slice(&[0x48, 0x8b, 0x05]);
        body.extend_from_slice(&disp.to_le_bytes());
        body.extend_from_slice(&[0x83, 0xc0, addend, 0x74, je, 0x5d, 0xc3]);
        body
    }

    #[test]
    /// The same code loaded at two addresses, with its outgoing references relocated, digests the same
    fn test_address_independence() {
        let engine = FingerprintEngine::<super::X64>::new();

        let first = engine.fingerprint_bytes(&body(0x1000, 0x2010, 1, 0), 0x1000);
        let second = engine.fingerprint_bytes(&body(0x0bad_0000, 0x1234_5678, 1, 0), 0x7fff_0000_0000);
        let same_bytes = engine.fingerprint_bytes(&body(0x1000, 0x2010, 1, 0), 0x5000_0000);

        assert_eq!(first, second);
        assert_eq!(first, same_bytes);
    }

    #[test]
    /// Changes to anything that isn't a position are visible
    fn test_code_changes() {
        let engine = FingerprintEngine::<super::X64>::new();
        let original = engine.fingerprint_bytes(&body(0x1000, 0x2010, 1, 0), 0x1000);

        // different constant
        assert_ne!(original, engine.fingerprint_bytes(&body(0x1000, 0x2010, 2, 0), 0x1000));
        // branch inside the body now lands somewhere else
        assert_ne!(original, engine.fingerprint_bytes(&body(0x1000, 0x2010, 1, 1), 0x1000));
        // trailing instruction dropped
        let mut truncated = body(0x1000, 0x2010, 1, 0);
        truncated.pop();
        assert_ne!(original, engine.fingerprint_bytes(&truncated, 0x1000));
    }

    #[test]
    /// Absolute displacements are masked for 32-bit code
    fn test_absolute_memory() {
        let engine = FingerprintEngine::<X86>::new();
        // mov eax, [disp32]; ret
        let first = [0x8b, 0x05, 0x00, 0x10, 0x40, 0x00, 0xc3];
        let relocated = [0x8b, 0x05, 0x00, 0x10, 0x80, 0x00, 0xc3];
        // mov eax, [ebx+disp32]; ret
        let based = [0x8b, 0x83, 0x00, 0x10, 0x40, 0x00, 0xc3];
        let rebased = [0x8b, 0x83, 0x00, 0x10, 0x80, 0x00, 0xc3];

        assert_eq!(
            engine.fingerprint_bytes(&first, 0x0040_1000),
            engine.fingerprint_bytes(&relocated, 0x0080_1000)
        );
        assert_ne!(
            engine.fingerprint_bytes(&based, 0x0040_1000),
            engine.fingerprint_bytes(&rebased, 0x0040_1000)
        );
    }

    #[test]
    /// Fingerprinting through a host reads the registered body, and fails on missing bodies
    fn test_host_bodies() {
        let engine = FingerprintEngine::<super::X64>::new();
        let mut host = MockHost::new();
        let handle = host.add_function("Stats::MaxHitpoints", 0x1000, body(0x1000, 0x2010, 1, 0));

        assert_eq!(
            engine.fingerprint(&host, &handle).unwrap(),
            engine.fingerprint_bytes(&body(0x1000, 0x2010, 1, 0), 0x1000)
        );

        let missing = FunctionHandle::new(0x9000, 0x10);
        assert!(matches!(
            engine.fingerprint(&host, &missing),
            Err(UnresolvedTarget::BodyUnreadable { address: 0x9000, .. })
        ));
        let empty = FunctionHandle::new(0x1000, 0);
        assert!(engine.fingerprint(&host, &empty).is_err());
    }
}
