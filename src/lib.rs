//! # Alternative instruction patching
//!
//! Rewrites sequences in the resident kernel text with CPU-specific alternatives
//! during early boot. Writes are made through the page tables of the address space
//! being patched, landing on the kernel-visible alias of each backing frame instead
//! of the (possibly read-only) text mapping itself.

#![allow(clippy::identity_op)]
#![allow(clippy::new_without_default)]

// Strict safety enforcement
#![deny(clippy::not_unsafe_ptr_arg_deref)]
#![deny(clippy::cast_ptr_alignment)]
#![deny(clippy::indexing_slicing)]
#![deny(clippy::arithmetic_side_effects)]
#![deny(clippy::unwrap_used)]
#![deny(static_mut_refs)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#![cfg_attr(test, allow(clippy::arithmetic_side_effects, clippy::indexing_slicing, clippy::unwrap_used))]
#![cfg_attr(not(test), no_std)]

pub mod alternative;
pub mod arch;
pub mod error;
pub mod log;
pub mod memory;
pub mod paging;
pub mod sync;

#[cfg(test)]
mod tests;

pub use crate::alternative::{apply, try_apply, AltEntry, AltTable, ApplyStats, PatchRecord};
pub use crate::error::{ApplyError, PatchError};
pub use crate::memory::{Frame, PhysMap, PhysicalAddress, VirtualAddress, PAGE_SIZE};
pub use crate::paging::{walker::patch_range, AddressSpace};

#[cfg(not(test))]
macro_rules! linker_offsets(
    ($($name:ident),*) => {
        $(
        #[inline]
        pub fn $name() -> usize {
            unsafe extern "C" {
                static $name: u8;
            }
            (&raw const $name) as usize
        }
        )*
    }
);

/// Section boundaries provided by the kernel linker script.
#[cfg(not(test))]
pub(crate) mod kernel_executable_offsets {
    linker_offsets!(__altinstructions_start, __altinstructions_end);
}
