//! # Paging
//!
//! Read-only view of the translation tables of an address space. The patcher never
//! allocates, frees, or edits an entry; it only follows them to the frames that
//! back kernel text.

pub mod entry;
pub mod walker;

pub use entry::*;

use crate::memory::{Frame, PAGE_SHIFT, VirtualAddress};

/// Number of entries in one table
pub const ENTRY_COUNT: usize = 512;

/// Virtual address bits consumed per level
const LEVEL_BITS: u32 = 9;

/// Depth of a table in the hierarchy, counted from the leaves.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct PageTableLevel(u8);

impl PageTableLevel {
    /// 4 KiB leaves
    pub const PT: Self = Self(0);
    /// 2 MiB per entry
    pub const PD: Self = Self(1);
    /// 1 GiB per entry
    pub const PDPT: Self = Self(2);
    /// 512 GiB per entry
    pub const PML4: Self = Self(3);

    pub const fn number(self) -> u8 {
        self.0
    }

    pub const fn shift(self) -> u32 {
        LEVEL_BITS
            .wrapping_mul(self.0 as u32)
            .wrapping_add(PAGE_SHIFT as u32)
    }

    /// Bytes covered by one entry at this level.
    pub const fn size(self) -> usize {
        1usize.wrapping_shl(self.shift())
    }

    pub const fn index(self, addr: VirtualAddress) -> usize {
        addr.data().wrapping_shr(self.shift()) & (ENTRY_COUNT - 1)
    }

    /// Offset of `addr` inside the region covered by its entry.
    pub const fn region_offset(self, addr: VirtualAddress) -> usize {
        addr.data() & self.size().wrapping_sub(1)
    }

    /// End of the region covered by the entry for `addr`, clamped to `end`.
    pub fn region_end(self, addr: VirtualAddress, end: VirtualAddress) -> VirtualAddress {
        let boundary = (addr.data() & !self.size().wrapping_sub(1)).checked_add(self.size());
        match boundary {
            Some(boundary) if boundary < end.data() => VirtualAddress::new(boundary),
            _ => end,
        }
    }

    /// The level one step closer to the leaves.
    pub const fn next(self) -> Option<Self> {
        match self.0 {
            0 => None,
            n => Some(Self(n.wrapping_sub(1))),
        }
    }
}

/// The translation root of an address space.
///
/// Owned by whoever built the address space; this is just a handle to it.
#[derive(Clone, Copy, Debug)]
pub struct AddressSpace {
    root: Frame,
    root_level: PageTableLevel,
}

impl AddressSpace {
    /// A 4-level hierarchy rooted at the PML4 in `root`.
    pub const fn new(root: Frame) -> Self {
        Self::with_root_level(root, PageTableLevel::PML4)
    }

    /// A hierarchy whose top table sits at `root_level`.
    pub const fn with_root_level(root: Frame, root_level: PageTableLevel) -> Self {
        Self { root, root_level }
    }

    pub const fn root(&self) -> Frame {
        self.root
    }

    pub const fn root_level(&self) -> PageTableLevel {
        self.root_level
    }
}
