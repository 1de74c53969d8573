//! x86_64 page table entry definitions

use bitflags::bitflags;

use super::PageTableLevel;
use crate::memory::{Frame, PhysicalAddress};

bitflags! {
    /// Page table entry flags for 4-level long mode paging
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct EntryFlags: u64 {
        /// Present bit
        const PRESENT = 1 << 0;
        /// Writable
        const WRITABLE = 1 << 1;
        /// User accessible
        const USER = 1 << 2;
        /// Maps a large page instead of pointing at a table (PS)
        const HUGE_PAGE = 1 << 7;
        /// Not flushed on CR3 reload
        const GLOBAL = 1 << 8;
        /// No execute
        const NO_EXECUTE = 1 << 63;
    }
}

/// Physical address bits of an entry.
pub const ADDRESS_MASK: u64 = 0x000f_ffff_ffff_f000;

/// Physical address bits of a 2 MiB leaf. Bit 12 is PAT there.
pub const LARGE_ADDRESS_MASK: u64 = 0x000f_ffff_ffe0_0000;

/// What an entry at a given level points at.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryKind {
    /// Nothing is mapped here.
    Absent,
    /// The next, finer table.
    Table(Frame),
    /// A 2 MiB page starting at this frame.
    LargeLeaf(Frame),
    /// A single 4 KiB page.
    Leaf(Frame),
    /// A leaf coarser than the walker handles (1 GiB pages, or PS set in the root).
    Unsupported,
}

/// Page table entry
#[derive(Clone, Copy, Eq, PartialEq)]
#[repr(transparent)]
pub struct PageEntry(u64);

impl PageEntry {
    /// Create a new empty entry
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_raw(data: u64) -> Self {
        Self(data)
    }

    pub fn new(address: PhysicalAddress, flags: EntryFlags) -> Self {
        Self((address.data() as u64 & ADDRESS_MASK) | flags.bits())
    }

    pub const fn data(&self) -> u64 {
        self.0
    }

    pub fn flags(&self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0)
    }

    /// Check if entry is present
    pub fn present(&self) -> bool {
        self.flags().contains(EntryFlags::PRESENT)
    }

    /// Get physical address
    pub fn address(&self) -> PhysicalAddress {
        PhysicalAddress::new((self.0 & ADDRESS_MASK) as usize)
    }

    /// Decodes the entry as it is read at `level`.
    ///
    /// Level 0 entries are always leaves; PS is only honored one level up.
    pub fn kind(&self, level: PageTableLevel) -> EntryKind {
        if !self.present() {
            return EntryKind::Absent;
        }
        let frame = Frame::containing(self.address());
        if level == PageTableLevel::PT {
            return EntryKind::Leaf(frame);
        }
        if !self.flags().contains(EntryFlags::HUGE_PAGE) {
            return EntryKind::Table(frame);
        }
        if level == PageTableLevel::PD {
            let base = PhysicalAddress::new((self.0 & LARGE_ADDRESS_MASK) as usize);
            EntryKind::LargeLeaf(Frame::containing(base))
        } else {
            EntryKind::Unsupported
        }
    }
}

impl core::fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[entry {:#018x} {:?}]", self.0, self.flags())
    }
}
