//! # Runtime Code Patching
//!
//! Supports patching the kernel code at boot based on available CPU features.
//!
//! Each site that has an alternative is described by a [`PatchRecord`] emitted next
//! to it at build time. The records are linked into one contiguous table, in the
//! order the assembler saw them.

mod apply;
mod buffer;
mod feature;

pub use apply::{apply, patch_one, try_apply, ApplyStats};
pub use buffer::{PatchBuffer, MAX_PATCH_LEN};
pub use feature::{CpuFeature, FeatureSet, FeatureWords, FLAG_INV, NCAPINTS};

use core::{fmt, mem};

use crate::error::PatchError;
use crate::memory::VirtualAddress;

/// Defines the alternative table entry.
///
/// Both offsets are relative to the field holding them, as emitted by
/// `.long label - .`.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct PatchRecord {
    /// Original instruction
    pub source_offset: i32,
    /// Replacement instruction
    pub replacement_offset: i32,
    pub feature: u16,
    /// Bytes reserved at the original site
    pub source_len: u16,
    pub replacement_len: u16,
}

impl PatchRecord {
    pub const SIZE: usize = mem::size_of::<PatchRecord>();

    const REPLACEMENT_FIELD: usize = mem::offset_of!(PatchRecord, replacement_offset);

    pub const fn new(
        source_offset: i32,
        replacement_offset: i32,
        feature: CpuFeature,
        source_len: u16,
        replacement_len: u16,
    ) -> Self {
        Self {
            source_offset,
            replacement_offset,
            feature: feature.raw(),
            source_len,
            replacement_len,
        }
    }

    /// Site to patch, for a record stored at `record`.
    pub fn source_addr(&self, record: VirtualAddress) -> Result<VirtualAddress, PatchError> {
        record.offset(self.source_offset)
    }

    /// Replacement bytes, for a record stored at `record`.
    pub fn replacement_addr(&self, record: VirtualAddress) -> Result<VirtualAddress, PatchError> {
        record
            .add(Self::REPLACEMENT_FIELD)?
            .offset(self.replacement_offset)
    }

    pub fn feature(&self) -> CpuFeature {
        CpuFeature::from_raw(self.feature)
    }

    pub fn source_len(&self) -> usize {
        usize::from(self.source_len)
    }

    pub fn replacement_len(&self) -> usize {
        usize::from(self.replacement_len)
    }
}

impl fmt::Debug for PatchRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            source_offset,
            replacement_offset,
            source_len,
            replacement_len,
            ..
        } = *self;
        f.debug_struct("PatchRecord")
            .field("source_offset", &source_offset)
            .field("replacement_offset", &replacement_offset)
            .field("feature", &self.feature())
            .field("source_len", &source_len)
            .field("replacement_len", &replacement_len)
            .finish()
    }
}

/// One record together with where it lives.
#[derive(Clone, Copy, Debug)]
pub struct AltEntry<'a> {
    /// Position in the table.
    pub index: usize,
    /// Address the record is stored at.
    pub addr: VirtualAddress,
    pub record: &'a PatchRecord,
}

impl AltEntry<'_> {
    pub fn source_addr(&self) -> Result<VirtualAddress, PatchError> {
        self.record.source_addr(self.addr)
    }

    pub fn replacement_addr(&self) -> Result<VirtualAddress, PatchError> {
        self.record.replacement_addr(self.addr)
    }
}

/// An ordered table of records.
///
/// Iteration is always first to last. A later record may overwrite bytes an
/// earlier one wrote, and some routines rely on exactly that.
#[derive(Clone, Copy, Debug)]
pub struct AltTable<'a> {
    records: &'a [PatchRecord],
    base: VirtualAddress,
}

impl<'a> AltTable<'a> {
    /// A table whose first record is stored at `base`.
    pub const fn new(records: &'a [PatchRecord], base: VirtualAddress) -> Self {
        Self { records, base }
    }

    /// A table addressed where it actually sits in memory.
    pub fn from_slice(records: &'a [PatchRecord]) -> Self {
        Self::new(records, VirtualAddress::new(records.as_ptr() as usize))
    }

    /// The records between two section markers.
    ///
    /// # Safety
    ///
    /// `[start, end)` must hold initialized records, live for `'a`, and not be
    /// written while the table is in use.
    pub unsafe fn from_raw(start: usize, end: usize) -> Self {
        let count = end
            .saturating_sub(start)
            .checked_div(PatchRecord::SIZE)
            .unwrap_or(0);
        let records =
            unsafe { core::slice::from_raw_parts(start as *const PatchRecord, count) };
        Self::new(records, VirtualAddress::new(start))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn base(&self) -> VirtualAddress {
        self.base
    }

    /// Address just past the last record.
    pub fn end(&self) -> VirtualAddress {
        VirtualAddress::new(
            self.base
                .data()
                .wrapping_add(self.records.len().wrapping_mul(PatchRecord::SIZE)),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = AltEntry<'a>> + use<'a> {
        let records: &'a [PatchRecord] = self.records;
        let base = self.base;
        records
            .iter()
            .enumerate()
            .map(move |(index, record)| AltEntry {
                index,
                addr: VirtualAddress::new(
                    base.data()
                        .wrapping_add(index.wrapping_mul(PatchRecord::SIZE)),
                ),
                record,
            })
    }

    /// Records whose feature test passes on `features`, still in table order.
    pub fn applicable<'f, F: FeatureSet + ?Sized>(
        &self,
        features: &'f F,
    ) -> impl Iterator<Item = AltEntry<'a>> + use<'a, 'f, F> {
        let records: &'a [PatchRecord] = self.records;
        let base = self.base;
        records
            .iter()
            .enumerate()
            .filter(move |(_, record)| record.feature().applies(features))
            .map(move |(index, record)| AltEntry {
                index,
                addr: VirtualAddress::new(
                    base.data()
                        .wrapping_add(index.wrapping_mul(PatchRecord::SIZE)),
                ),
                record,
            })
    }
}
