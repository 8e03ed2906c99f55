//! This module contains the instruction sets the fingerprint engine can decode

use iced_x86::{Decoder, DecoderOptions};

/// Helper functions for an architecture
pub trait Architecture {
    /// Decoder bitness for the architecture
    const BITNESS: u32;

    /// Creates an instruction decoder for `data`, as if it had been loaded at `ip`
    fn decoder(data: &[u8], ip: u64) -> Decoder<'_> {
        Decoder::with_ip(Self::BITNESS, data, ip, DecoderOptions::NONE)
    }
}

/// 32-bit x86
#[derive(Debug, Clone, Copy, Default)]
pub struct X86;
impl Architecture for X86 {
    const BITNESS: u32 = 32;
}

/// 64-bit x86
#[derive(Debug, Clone, Copy, Default)]
pub struct X64;
impl Architecture for X64 {
    const BITNESS: u32 = 64;
}
