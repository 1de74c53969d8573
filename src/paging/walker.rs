//! Translation walker
//!
//! Resolves a virtual range to the frames that back it, one table level at a time,
//! and copies bytes to or from their kernel-visible alias.
//!
//! The walk is a single recursive function over [`PageTableLevel`]. At every level
//! the range is cut at entry boundaries; tables are descended into, leaves (4 KiB
//! or 2 MiB) are cut again at page boundaries and handed to a sink one page at a
//! time.

use super::{AddressSpace, EntryKind, PageEntry, PageTableLevel};
use crate::error::PatchError;
use crate::memory::{
    copy_from_page, copy_to_page, read_u64, Frame, PhysMap, PhysicalAddress, VirtualAddress,
    PAGE_SHIFT,
};
use crate::sync::with_text_lock;

/// The part of a range that falls in a single page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Chunk {
    /// Virtual address of the first byte.
    pub virt: VirtualAddress,
    /// Frame backing it.
    pub frame: Frame,
    /// Offset of the first byte inside `frame`.
    pub offset: usize,
    pub len: usize,
}

fn walk<P, F>(
    phys: &P,
    table: Frame,
    level: PageTableLevel,
    start: VirtualAddress,
    end: VirtualAddress,
    sink: &mut F,
) -> Result<(), PatchError>
where
    P: PhysMap,
    F: FnMut(Chunk) -> Result<(), PatchError>,
{
    let mut addr = start;
    while addr < end {
        let next = level.region_end(addr, end);
        let entry = PageEntry::from_raw(read_u64(phys, table, level.index(addr))?);

        match entry.kind(level) {
            EntryKind::Absent => {
                return Err(PatchError::MissingMapping {
                    addr,
                    level: level.number(),
                });
            }
            EntryKind::Unsupported => {
                // TODO: 1 GiB leaves, if kernel text is ever mapped with them.
                return Err(PatchError::UnsupportedLeafGranularity {
                    addr,
                    level: level.number(),
                });
            }
            EntryKind::Table(child) => {
                // Level 0 entries decode as leaves, so there is always a level below.
                let lower = level.next().ok_or(PatchError::MissingMapping {
                    addr,
                    level: level.number(),
                })?;
                walk(phys, child, lower, addr, next, sink)?;
            }
            EntryKind::LargeLeaf(base) | EntryKind::Leaf(base) => {
                leaf(base, level, addr, next, sink)?;
            }
        }

        addr = next;
    }
    Ok(())
}

/// Splits `[start, end)`, which lies inside one leaf at `level`, into pages.
fn leaf<F>(
    base: Frame,
    level: PageTableLevel,
    start: VirtualAddress,
    end: VirtualAddress,
    sink: &mut F,
) -> Result<(), PatchError>
where
    F: FnMut(Chunk) -> Result<(), PatchError>,
{
    let mut addr = start;
    while addr < end {
        let next = PageTableLevel::PT.region_end(addr, end);
        let frame = base.try_next_by(level.region_offset(addr).wrapping_shr(PAGE_SHIFT.into()))?;
        let len = next
            .data()
            .checked_sub(addr.data())
            .ok_or(PatchError::AddressOverflow)?;

        sink(Chunk {
            virt: addr,
            frame,
            offset: addr.page_offset(),
            len,
        })?;

        addr = next;
    }
    Ok(())
}

fn span(start: VirtualAddress, end: VirtualAddress) -> Result<usize, PatchError> {
    end.data()
        .checked_sub(start.data())
        .ok_or(PatchError::AddressOverflow)
}

/// Visits every page of `[start, end)` in address order.
pub fn for_each_chunk<P, F>(
    space: &AddressSpace,
    phys: &P,
    start: VirtualAddress,
    end: VirtualAddress,
    mut sink: F,
) -> Result<(), PatchError>
where
    P: PhysMap,
    F: FnMut(Chunk) -> Result<(), PatchError>,
{
    walk(phys, space.root(), space.root_level(), start, end, &mut sink)
}

/// Writes `bytes` over `[start, end)` through the backing frames.
///
/// The whole range is resolved before the first write, so a missing or unsupported
/// mapping anywhere in it leaves every byte of the range untouched. Once writing
/// starts, each page is copied under its own acquisition of the text lock; the
/// range as a whole is not written atomically.
///
/// Returns the number of page writes made.
pub fn patch_range<P: PhysMap>(
    space: &AddressSpace,
    phys: &P,
    start: VirtualAddress,
    end: VirtualAddress,
    bytes: &[u8],
) -> Result<usize, PatchError> {
    let len = span(start, end)?;
    if len != bytes.len() {
        return Err(PatchError::LengthMismatch {
            expected: len,
            actual: bytes.len(),
        });
    }
    if len == 0 {
        return Ok(0);
    }

    for_each_chunk(space, phys, start, end, |_| Ok(()))?;

    let mut pages = 0usize;
    for_each_chunk(space, phys, start, end, |chunk| {
        let from = span(start, chunk.virt)?;
        let to = from.checked_add(chunk.len).ok_or(PatchError::AddressOverflow)?;
        let src = bytes.get(from..to).ok_or(PatchError::LengthMismatch {
            expected: to,
            actual: bytes.len(),
        })?;

        with_text_lock(|| copy_to_page(phys, chunk.frame, chunk.offset, src))?;
        pages = pages.saturating_add(1);
        Ok(())
    })?;

    log::trace!(
        "patched {:#x}..{:#x} in {} page write(s)",
        start.data(),
        end.data(),
        pages
    );
    Ok(pages)
}

/// Reads `out.len()` bytes starting at `start` through the backing frames.
pub fn read_range<P: PhysMap>(
    space: &AddressSpace,
    phys: &P,
    start: VirtualAddress,
    out: &mut [u8],
) -> Result<(), PatchError> {
    let end = start.add(out.len())?;
    for_each_chunk(space, phys, start, end, |chunk| {
        let from = span(start, chunk.virt)?;
        let to = from.checked_add(chunk.len).ok_or(PatchError::AddressOverflow)?;
        let available = out.len();
        let dst = out.get_mut(from..to).ok_or(PatchError::LengthMismatch {
            expected: to,
            actual: available,
        })?;
        copy_from_page(phys, chunk.frame, chunk.offset, dst)
    })
}

/// Physical address backing `addr`.
pub fn translate<P: PhysMap>(
    space: &AddressSpace,
    phys: &P,
    addr: VirtualAddress,
) -> Result<PhysicalAddress, PatchError> {
    let mut found = None;
    for_each_chunk(space, phys, addr, addr.add(1)?, |chunk| {
        found = Some(chunk.frame.base().add(chunk.offset)?);
        Ok(())
    })?;
    found.ok_or(PatchError::MissingMapping {
        addr,
        level: PageTableLevel::PT.number(),
    })
}
