use super::{AltEntry, PatchBuffer};
use crate::error::{ApplyError, PatchError};
use crate::memory::{PhysMap, VirtualAddress};
use crate::paging::walker::{patch_range, read_range};
use crate::paging::AddressSpace;

/// What a pass over a table did.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ApplyStats {
    /// Records written.
    pub records: usize,
    /// Records with an empty site.
    pub skipped: usize,
    /// Bytes of kernel text overwritten.
    pub bytes: usize,
    /// Separate page writes those bytes took.
    pub pages: usize,
}

/// Installs a single record, returning the number of page writes.
pub fn patch_one<P: PhysMap>(
    entry: &AltEntry<'_>,
    space: &AddressSpace,
    phys: &P,
    nop: u8,
) -> Result<usize, PatchError> {
    let record = entry.record;
    let instr = entry.source_addr()?;
    let replacement = entry.replacement_addr()?;

    log::debug!(
        "feat: {}, old: ({:#x} len: {}), repl: ({:#x}, len: {})",
        record.feature(),
        instr.data(),
        record.source_len(),
        replacement.data(),
        record.replacement_len()
    );

    let mut buffer = PatchBuffer::new(record.source_len(), record.replacement_len(), nop)?;
    read_range(space, phys, replacement, buffer.replacement_mut())?;

    if log::log_enabled!(log::Level::Trace) {
        dump_bytes(space, phys, instr, record.source_len(), "old_insn");
        dump_bytes(space, phys, replacement, record.replacement_len(), "rpl_insn");
        log::trace!("{:#x}: final_insn: {:02x?}", instr.data(), buffer.as_slice());
    }

    let end = instr.add(buffer.len())?;
    patch_range(space, phys, instr, end, buffer.as_slice())
}

fn dump_bytes<P: PhysMap>(
    space: &AddressSpace,
    phys: &P,
    addr: VirtualAddress,
    len: usize,
    what: &str,
) {
    let mut bytes = [0u8; super::MAX_PATCH_LEN];
    match bytes.get_mut(..len) {
        Some(bytes) => match read_range(space, phys, addr, bytes) {
            Ok(()) => log::trace!("{:#x}: {what}: {:02x?}", addr.data(), bytes),
            Err(err) => log::trace!("{:#x}: {what}: unreadable: {err}", addr.data()),
        },
        None => log::trace!("{:#x}: {what}: {len} bytes, too long to dump", addr.data()),
    }
}

/// Applies `entries` in the order given, stopping at the first failure.
///
/// Entries must already be filtered down to the ones whose feature applies; see
/// [`super::AltTable::applicable`]. The record that fails leaves its site as it
/// was, but every record before it stays applied.
pub fn try_apply<'a, I, P>(
    entries: I,
    space: &AddressSpace,
    phys: &P,
    nop: u8,
) -> Result<ApplyStats, ApplyError>
where
    I: IntoIterator<Item = AltEntry<'a>>,
    P: PhysMap,
{
    let mut stats = ApplyStats::default();

    //
    // The scan order must be from start to end. A later alternative can overwrite
    // code patched by an earlier one, and routines like memcpy are patched that way.
    //
    for entry in entries {
        if entry.record.source_len() == 0 {
            stats.skipped = stats.skipped.saturating_add(1);
            continue;
        }

        let pages = patch_one(&entry, space, phys, nop).map_err(|error| ApplyError {
            index: entry.index,
            addr: entry.source_addr().unwrap_or(entry.addr),
            error,
        })?;

        stats.records = stats.records.saturating_add(1);
        stats.bytes = stats.bytes.saturating_add(entry.record.source_len());
        stats.pages = stats.pages.saturating_add(pages);
    }

    Ok(stats)
}

/// Applies `entries`, halting the kernel if any of them cannot be installed.
///
/// A half-patched text cannot safely keep running, so there is nothing to return
/// to on failure.
pub fn apply<'a, I, P>(entries: I, space: &AddressSpace, phys: &P, nop: u8) -> ApplyStats
where
    I: IntoIterator<Item = AltEntry<'a>>,
    P: PhysMap,
{
    match try_apply(entries, space, phys, nop) {
        Ok(stats) => stats,
        Err(err) => {
            log::error!("{err}");
            panic!("failed to apply alternatives: {err}");
        }
    }
}
