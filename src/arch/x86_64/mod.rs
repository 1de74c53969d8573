//! x86_64 Architecture Module
//!
//! Boot-time patching of the kernel's own text, driven by what CPUID reports for the
//! bootstrap processor.

pub mod alternative;
pub mod consts;
pub mod cpuid;
