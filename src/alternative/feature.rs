//! CPU feature numbers as they are stored in patch records.
//!
//! A number is `word * 32 + bit`, where `word` indexes the capability words the boot
//! CPU reports. Bit 15 inverts the test: the record applies when the feature is
//! absent.

use core::fmt;

/// Set in a record's feature field to apply it when the feature is missing.
pub const FLAG_INV: u16 = 1 << 15;

/// Number of capability words tracked.
pub const NCAPINTS: usize = 10;

#[derive(Clone, Copy, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct CpuFeature(u16);

impl CpuFeature {
    pub const fn new(word: u16, bit: u16) -> Self {
        Self((word.wrapping_shl(5) | (bit & 0x1f)) & !FLAG_INV)
    }

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    /// The same feature, tested for absence.
    pub const fn inverted(self) -> Self {
        Self(self.0 | FLAG_INV)
    }

    pub const fn is_inverted(self) -> bool {
        self.0 & FLAG_INV != 0
    }

    /// The feature number with the inversion flag masked away.
    pub const fn number(self) -> u16 {
        self.0 & !FLAG_INV
    }

    pub const fn word(self) -> u16 {
        self.number().wrapping_shr(5)
    }

    pub const fn bit(self) -> u16 {
        self.number() & 0x1f
    }

    /// Whether a record gated on this feature should be applied on `set`.
    pub fn applies<S: FeatureSet + ?Sized>(self, set: &S) -> bool {
        set.has(self.number()) != self.is_inverted()
    }
}

impl fmt::Debug for CpuFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[feature {self}]")
    }
}

impl fmt::Display for CpuFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}*32+{}",
            if self.is_inverted() { "!" } else { "" },
            self.word(),
            self.bit()
        )
    }
}

/// Answers whether the boot CPU has a feature.
pub trait FeatureSet {
    /// `number` never carries [`FLAG_INV`].
    fn has(&self, number: u16) -> bool;
}

/// Capability words, one bit per feature number.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FeatureWords {
    words: [u32; NCAPINTS],
}

impl FeatureWords {
    pub const fn empty() -> Self {
        Self {
            words: [0; NCAPINTS],
        }
    }

    pub const fn from_words(words: [u32; NCAPINTS]) -> Self {
        Self { words }
    }

    pub fn word(&self, word: usize) -> Option<u32> {
        self.words.get(word).copied()
    }

    /// Marks `feature` present. Words past [`NCAPINTS`] are ignored.
    pub fn set(&mut self, feature: CpuFeature) {
        if let Some(word) = self.words.get_mut(usize::from(feature.word())) {
            *word |= mask(feature);
        }
    }

    pub fn clear(&mut self, feature: CpuFeature) {
        if let Some(word) = self.words.get_mut(usize::from(feature.word())) {
            *word &= !mask(feature);
        }
    }
}

fn mask(feature: CpuFeature) -> u32 {
    1u32.wrapping_shl(u32::from(feature.bit()))
}

impl FeatureSet for FeatureWords {
    fn has(&self, number: u16) -> bool {
        let feature = CpuFeature::from_raw(number);
        self.word(usize::from(feature.word()))
            .is_some_and(|word| word & mask(feature) != 0)
    }
}
