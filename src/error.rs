//! Errors raised while resolving or writing patch sites.
//!
//! None of these are recoverable at boot: the caller of [`crate::apply`] halts
//! with the diagnostic. They are still values so the walk can propagate them with `?`
//! and so the simulated machine in the tests can observe them.

use core::fmt;

use crate::memory::{PhysicalAddress, VirtualAddress};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PatchError {
    /// A table entry needed to reach `addr` is not present.
    MissingMapping { addr: VirtualAddress, level: u8 },
    /// The entry covering `addr` maps a leaf larger than a 2 MiB page.
    UnsupportedLeafGranularity { addr: VirtualAddress, level: u8 },
    /// The site is longer than the scratch buffer.
    BufferOverflow { len: usize, capacity: usize },
    /// The replacement does not fit in the space reserved at the site.
    ReplacementTooLong { replacement_len: usize, source_len: usize },
    /// `bytes` does not cover exactly `[start, end)`.
    LengthMismatch { expected: usize, actual: usize },
    /// A copy would leave the page it was resolved to.
    OutOfPage { phys: PhysicalAddress, offset: usize, len: usize },
    /// Address arithmetic wrapped.
    AddressOverflow,
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PatchError::MissingMapping { addr, level } => {
                write!(f, "no mapping for {:#x} at level {}", addr.data(), level)
            }
            PatchError::UnsupportedLeafGranularity { addr, level } => write!(
                f,
                "{:#x} is mapped by a level {} leaf, which is not implemented",
                addr.data(),
                level
            ),
            PatchError::BufferOverflow { len, capacity } => {
                write!(f, "patch of {len} bytes exceeds buffer of {capacity}")
            }
            PatchError::ReplacementTooLong {
                replacement_len,
                source_len,
            } => write!(
                f,
                "replacement of {replacement_len} bytes longer than site of {source_len}"
            ),
            PatchError::LengthMismatch { expected, actual } => {
                write!(f, "expected {expected} bytes, got {actual}")
            }
            PatchError::OutOfPage { phys, offset, len } => write!(
                f,
                "{len} bytes at offset {offset:#x} overrun page {:#x}",
                phys.data()
            ),
            PatchError::AddressOverflow => f.write_str("address overflow"),
        }
    }
}

/// A [`PatchError`] tied to the record that raised it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ApplyError {
    /// Position of the record in its table.
    pub index: usize,
    /// Site the record points at.
    pub addr: VirtualAddress,
    pub error: PatchError,
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "alternative #{} at {:#x}: {}",
            self.index,
            self.addr.data(),
            self.error
        )
    }
}
