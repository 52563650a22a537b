use anyhow::{ensure, Result};
use bitvec::prelude::{BitVec, Lsb0};

use crate::error::Ext3Error;

/// Allocation state of the blocks or inodes of one group.
/// A set bit means "allocated".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationBitmap(BitVec<u8, Lsb0>);

impl AllocationBitmap {
    #[must_use]
    pub fn new(raw: Vec<u8>) -> Self {
        AllocationBitmap(BitVec::from_vec(raw))
    }

    /// Number of bits in the bitmap.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether bit `index` is set. Indexing past the end of the bitmap is an error.
    pub fn is_allocated(&self, index: usize) -> Result<bool> {
        ensure!(
            index < self.0.len(),
            Ext3Error::Corrupt(format!(
                "bit {index} is outside a {}-bit allocation bitmap",
                self.0.len()
            ))
        );

        Ok(self.0[index])
    }

    pub fn count_allocated(&self) -> usize {
        self.0.count_ones()
    }
}
