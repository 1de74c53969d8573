//! # Runtime Code Patching
//!
//! Boot entry points that patch the kernel, or a freshly loaded module, with the
//! alternatives that fit the bootstrap processor.
//!
//! This runs before the APs are started, so no other CPU can be fetching the text
//! being rewritten. That also means asymmetric systems where APs lack features the
//! BSP has are not handled; such features have to be disabled by hand.

use super::consts::{NOP, PHYS_OFFSET};
use crate::alternative::{self, AltTable, ApplyStats, FeatureSet};
use crate::memory::{LinearPhysMap, PhysMap};
use crate::paging::AddressSpace;

#[cfg(not(test))]
static APPLIED: spin::Once<ApplyStats> = spin::Once::new();

/// The table the linker collected for the kernel image.
#[cfg(not(test))]
pub fn kernel_alternatives() -> AltTable<'static> {
    let start = crate::kernel_executable_offsets::__altinstructions_start();
    let end = crate::kernel_executable_offsets::__altinstructions_end();
    unsafe { AltTable::from_raw(start, end) }
}

/// Applies every record of `table` whose feature test passes on `features`.
pub fn apply_table<F, P>(
    table: AltTable<'_>,
    space: &AddressSpace,
    phys: &P,
    features: &F,
) -> ApplyStats
where
    F: FeatureSet + ?Sized,
    P: PhysMap,
{
    if !cfg!(feature = "self_modifying") {
        log::info!("alternatives: self_modifying disabled, leaving text as built");
        return ApplyStats::default();
    }

    log::debug!(
        "alt table {:#x} -> {:#x}",
        table.base().data(),
        table.end().data()
    );
    let stats = alternative::apply(table.applicable(features), space, phys, NOP);
    log::info!(
        "alternatives: {} of {} applied, {} bytes in {} page writes",
        stats.records,
        table.len(),
        stats.bytes,
        stats.pages
    );
    stats
}

/// Replaces instructions with better alternatives for this CPU.
///
/// Only the first call patches; later calls return what it did.
///
/// # Safety
///
/// Must run on the BSP before any other CPU is started, with `space` being the
/// active kernel address space and all physical memory mapped at [`PHYS_OFFSET`].
#[cfg(not(test))]
#[inline(never)]
pub unsafe fn apply_alternatives<F: FeatureSet + ?Sized>(
    space: &AddressSpace,
    features: &F,
) -> ApplyStats {
    if let Some(stats) = APPLIED.get() {
        log::warn!("alternatives: already applied");
        return *stats;
    }
    *APPLIED.call_once(|| {
        let phys = unsafe { LinearPhysMap::new(PHYS_OFFSET) };
        apply_table(kernel_alternatives(), space, &phys, features)
    })
}

/// Patches the alternatives of a module that was just loaded into `space`.
///
/// # Safety
///
/// The module's text must not be executing yet, and all physical memory must be
/// mapped at [`PHYS_OFFSET`].
pub unsafe fn apply_module_alternatives<F: FeatureSet + ?Sized>(
    table: AltTable<'_>,
    space: &AddressSpace,
    features: &F,
) -> ApplyStats {
    let phys = unsafe { LinearPhysMap::new(PHYS_OFFSET) };
    apply_table(table, space, &phys, features)
}
