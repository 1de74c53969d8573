//! x86_64 constants

/// Offset at which all of physical memory is mapped in the kernel half.
pub const PHYS_OFFSET: usize = 0xFFFF_8000_0000_0000;

/// Single-byte `nop`, used to pad replacements up to the length of the original.
pub const NOP: u8 = 0x90;
