//! Capability words of the boot CPU.
//!
//! Word numbering follows the usual layout: 0 is CPUID.1:EDX, 1 is
//! CPUID.0x80000001:EDX, 4 is CPUID.1:ECX, 6 is CPUID.0x80000001:ECX and 9 is
//! CPUID.(7,0):EBX. Bits this kernel never gates on stay clear.

use raw_cpuid::CpuId;

use crate::alternative::{CpuFeature, FeatureWords};

pub const X86_FEATURE_FPU: CpuFeature = CpuFeature::new(0, 0);
pub const X86_FEATURE_XMM2: CpuFeature = CpuFeature::new(0, 26);
pub const X86_FEATURE_LM: CpuFeature = CpuFeature::new(1, 29);
pub const X86_FEATURE_XMM4_2: CpuFeature = CpuFeature::new(4, 20);
pub const X86_FEATURE_POPCNT: CpuFeature = CpuFeature::new(4, 23);
pub const X86_FEATURE_XSAVE: CpuFeature = CpuFeature::new(4, 26);
pub const X86_FEATURE_LAHF_LM: CpuFeature = CpuFeature::new(6, 0);
pub const X86_FEATURE_FSGSBASE: CpuFeature = CpuFeature::new(9, 0);
pub const X86_FEATURE_SMEP: CpuFeature = CpuFeature::new(9, 7);
pub const X86_FEATURE_ERMS: CpuFeature = CpuFeature::new(9, 9);
pub const X86_FEATURE_SMAP: CpuFeature = CpuFeature::new(9, 20);

fn mark(words: &mut FeatureWords, feature: CpuFeature, present: bool) {
    if present {
        words.set(feature);
    }
}

/// Reads the capability words of the CPU this runs on.
///
/// Only the features this kernel gates on are filled in.
pub fn boot_cpu_features() -> FeatureWords {
    let cpuid = CpuId::new();
    let mut words = FeatureWords::empty();

    if let Some(info) = cpuid.get_feature_info() {
        mark(&mut words, X86_FEATURE_FPU, info.has_fpu());
        mark(&mut words, X86_FEATURE_XMM2, info.has_sse2());
        mark(&mut words, X86_FEATURE_XMM4_2, info.has_sse42());
        mark(&mut words, X86_FEATURE_POPCNT, info.has_popcnt());
        mark(&mut words, X86_FEATURE_XSAVE, info.has_xsave());
    }

    if let Some(ext) = cpuid.get_extended_processor_and_feature_identifiers() {
        mark(&mut words, X86_FEATURE_LM, ext.has_64bit_mode());
        mark(&mut words, X86_FEATURE_LAHF_LM, ext.has_lahf_sahf());
    }

    if let Some(ext) = cpuid.get_extended_feature_info() {
        mark(&mut words, X86_FEATURE_FSGSBASE, ext.has_fsgsbase());
        mark(&mut words, X86_FEATURE_SMEP, ext.has_smep());
        mark(&mut words, X86_FEATURE_ERMS, ext.has_rep_movsb_stosb());
        mark(&mut words, X86_FEATURE_SMAP, ext.has_smap());
    }

    words
}
