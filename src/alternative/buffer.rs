//! Scratch space holding the final bytes for one site.

use arrayvec::ArrayVec;

use crate::error::PatchError;

/// Longest site that can be patched.
pub const MAX_PATCH_LEN: usize = 255;

/// The replacement for a site, padded with no-ops up to the site's length.
#[derive(Clone, Debug)]
pub struct PatchBuffer {
    bytes: ArrayVec<u8, MAX_PATCH_LEN>,
    replacement_len: usize,
}

impl PatchBuffer {
    /// A buffer for a site of `source_len` bytes, entirely filled with `nop`.
    ///
    /// The first `replacement_len` bytes are then meant to be overwritten through
    /// [`PatchBuffer::replacement_mut`].
    pub fn new(source_len: usize, replacement_len: usize, nop: u8) -> Result<Self, PatchError> {
        if source_len > MAX_PATCH_LEN {
            return Err(PatchError::BufferOverflow {
                len: source_len,
                capacity: MAX_PATCH_LEN,
            });
        }
        if replacement_len > source_len {
            return Err(PatchError::ReplacementTooLong {
                replacement_len,
                source_len,
            });
        }

        let mut bytes = ArrayVec::new();
        for _ in 0..source_len {
            bytes.try_push(nop).map_err(|_| PatchError::BufferOverflow {
                len: source_len,
                capacity: MAX_PATCH_LEN,
            })?;
        }
        Ok(Self {
            bytes,
            replacement_len,
        })
    }

    /// `replacement` followed by `nop` padding up to `source_len`.
    pub fn build(replacement: &[u8], source_len: usize, nop: u8) -> Result<Self, PatchError> {
        let mut buffer = Self::new(source_len, replacement.len(), nop)?;
        buffer.replacement_mut().copy_from_slice(replacement);
        Ok(buffer)
    }

    /// The leading bytes that hold the replacement proper.
    pub fn replacement_mut(&mut self) -> &mut [u8] {
        let (replacement, _padding) = self.bytes.split_at_mut(self.replacement_len);
        replacement
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of trailing no-op bytes.
    pub fn padding(&self) -> usize {
        self.bytes.len().saturating_sub(self.replacement_len)
    }
}
