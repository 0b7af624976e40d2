//! Padding and look-ahead masks.
//!
//! Masks are built on the host as boolean grids of `(batch, query, key)`
//! where `true` means the query may not attend to the key. They become
//! additive tensors only at the last moment, via [AttentionMask::to_bias()].
//!
//! ```rust
//! # use melodist::nn::mask::AttentionMask;
//! // one sequence: two real tokens then padding
//! let pad = AttentionMask::padding(&[4, 7, 0], 1, 3).unwrap();
//! let causal = AttentionMask::look_ahead(1, 3);
//! let both = causal.union(&pad).unwrap();
//! assert!(!both.is_blocked(0, 1, 1));
//! assert!(both.is_blocked(0, 1, 2));
//! assert!(both.is_blocked(0, 2, 2));
//! ```

use dfdx::prelude::*;
use melodist_core::PAD_INDEX;

use super::AttnBias;
use crate::error::{MelodyError, Result};

/// Bias added to blocked scores. Large enough that softmax sends them to
/// zero, finite so a fully blocked row stays free of NaN.
pub const MASK_BIAS: f32 = -1e9;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttentionMask {
    batch: usize,
    queries: usize,
    keys: usize,
    blocked: Vec<bool>,
}

impl AttentionMask {
    /// A mask that blocks nothing.
    pub fn open(batch: usize, queries: usize, keys: usize) -> Self {
        Self {
            batch,
            queries,
            keys,
            blocked: vec![false; batch * queries * keys],
        }
    }

    /// Blocks every key position holding [PAD_INDEX].
    ///
    /// `key_ids` is `(batch, keys)` in row-major order. Every one of the
    /// `queries` rows sees the same key pattern.
    pub fn padding(key_ids: &[usize], batch: usize, queries: usize) -> Result<Self> {
        if batch == 0 || key_ids.len() % batch != 0 {
            return Err(MelodyError::Shape(format!(
                "{} key ids cannot be split into {batch} sequences",
                key_ids.len()
            )));
        }
        let keys = key_ids.len() / batch;
        let mut mask = Self::open(batch, queries, keys);
        for (b, row) in key_ids.chunks(keys.max(1)).enumerate().take(batch) {
            for q in 0..queries {
                for (k, &id) in row.iter().enumerate() {
                    mask.blocked[(b * queries + q) * keys + k] = id == PAD_INDEX;
                }
            }
        }
        Ok(mask)
    }

    /// Blocks every key strictly after its query.
    pub fn look_ahead(batch: usize, len: usize) -> Self {
        let mut mask = Self::open(batch, len, len);
        for b in 0..batch {
            for q in 0..len {
                for k in q + 1..len {
                    mask.blocked[(b * len + q) * len + k] = true;
                }
            }
        }
        mask
    }

    /// A cell is blocked if either mask blocks it.
    pub fn union(&self, other: &Self) -> Result<Self> {
        if self.shape() != other.shape() {
            return Err(MelodyError::Shape(format!(
                "cannot combine masks of shape {:?} and {:?}",
                self.shape(),
                other.shape()
            )));
        }
        Ok(Self {
            blocked: self
                .blocked
                .iter()
                .zip(&other.blocked)
                .map(|(a, b)| *a || *b)
                .collect(),
            ..*self
        })
    }

    /// `(batch, queries, keys)`
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.batch, self.queries, self.keys)
    }

    pub fn is_blocked(&self, batch: usize, query: usize, key: usize) -> bool {
        self.blocked[(batch * self.queries + query) * self.keys + key]
    }

    /// Expands into a `(batch, heads, queries, keys)` tensor of `0` for open
    /// cells and [MASK_BIAS] for blocked ones.
    pub fn to_bias<D: Device<f32>>(&self, dev: &D, heads: usize) -> Result<AttnBias<D>> {
        let plane = self.queries * self.keys;
        let mut data = Vec::with_capacity(self.batch * heads * plane);
        for grid in self.blocked.chunks(plane.max(1)).take(self.batch) {
            for _ in 0..heads {
                data.extend(grid.iter().map(|&b| if b { MASK_BIAS } else { 0.0 }));
            }
        }
        let shape = (self.batch, heads, self.queries, self.keys);
        Ok(dev.try_tensor_from_vec(data, shape)?)
    }
}
