//! Supervised training pairs, windowed shuffling and padded batches.
//!
//! A melody of length `L` yields `L - 1` [TrainingPair]s. The prefix of
//! length `i` is paired with the same window shifted one position forward:
//!
//! ```rust
//! # use melodist_core::prelude::*;
//! let pairs: Vec<TrainingPair> = training_pairs(&[5, 6, 7]).collect();
//! assert_eq!(pairs.len(), 2);
//! assert_eq!(pairs[1].input, vec![5, 6]);
//! assert_eq!(pairs[1].target, vec![6, 7]);
//! ```
//!
//! A [Dataset] pads every batch to the longest melody of the whole corpus,
//! so all batches of a run share one shape. Each call to [Dataset::epoch()]
//! starts a fresh lazy stream whose order depends only on the dataset seed
//! and the epoch number.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::VocabularyError;
use crate::token::Melody;
use crate::vocab::Vocabulary;
use crate::PAD_INDEX;

/// Default size of the reorder buffer used by [ShuffleBuffer].
pub const DEFAULT_SHUFFLE_WINDOW: usize = 1000;

/// An encoded prefix and the next-token window it should predict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrainingPair {
    pub input: Vec<usize>,
    pub target: Vec<usize>,
}

/// Lazily yields the `len - 1` training pairs of one encoded melody.
pub fn training_pairs(encoded: &[usize]) -> impl Iterator<Item = TrainingPair> + '_ {
    (1..encoded.len()).map(move |i| TrainingPair {
        input: encoded[..i].to_vec(),
        target: encoded[1..=i].to_vec(),
    })
}

/// Windowed shuffle over any iterator.
///
/// Keeps up to `window` items buffered and emits a uniformly chosen one
/// each step, refilling from the source. A window of 1 preserves the
/// source order. A window at least as large as the source is a full
/// shuffle.
pub struct ShuffleBuffer<I: Iterator, R> {
    source: I,
    buffer: Vec<I::Item>,
    window: usize,
    rng: R,
}

impl<I: Iterator, R: Rng> ShuffleBuffer<I, R> {
    /// `window` values below 1 are treated as 1.
    pub fn new(source: I, window: usize, rng: R) -> Self {
        let window = window.max(1);
        Self {
            source,
            buffer: Vec::with_capacity(window.min(DEFAULT_SHUFFLE_WINDOW)),
            window,
            rng,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

impl<I: Iterator, R: Rng> Iterator for ShuffleBuffer<I, R> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.len() < self.window {
            match self.source.next() {
                Some(item) => self.buffer.push(item),
                None => break,
            }
        }
        if self.buffer.is_empty() {
            return None;
        }
        let i = self.rng.gen_range(0..self.buffer.len());
        Some(self.buffer.swap_remove(i))
    }
}

/// A batch of training pairs right-padded with [PAD_INDEX] to a fixed width.
///
/// Rows are stored flat in row-major order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaddedBatch {
    rows: usize,
    width: usize,
    inputs: Vec<usize>,
    targets: Vec<usize>,
}

impl PaddedBatch {
    /// Pads `pairs` to `width`. The width is raised to the longest row if
    /// any row would not fit.
    pub fn new(pairs: &[TrainingPair], width: usize) -> Self {
        let width = pairs
            .iter()
            .map(|p| p.input.len().max(p.target.len()))
            .fold(width, usize::max);
        let mut inputs = Vec::with_capacity(pairs.len() * width);
        let mut targets = Vec::with_capacity(pairs.len() * width);
        for pair in pairs {
            pad_into(&mut inputs, &pair.input, width);
            pad_into(&mut targets, &pair.target, width);
        }
        Self {
            rows: pairs.len(),
            width,
            inputs,
            targets,
        }
    }

    /// Number of pairs in the batch.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// `(rows, width)`, the shape shared by every view of the batch.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.width)
    }

    /// Encoder inputs: the padded prefixes.
    pub fn inputs(&self) -> &[usize] {
        &self.inputs
    }

    /// The padded target windows.
    pub fn targets(&self) -> &[usize] {
        &self.targets
    }

    /// Teacher-forced decoder inputs: every target row without its last
    /// column, right-padded by one.
    pub fn decoder_inputs(&self) -> Vec<usize> {
        self.shift_targets(0)
    }

    /// What the decoder should predict: every target row shifted left by one,
    /// right-padded by one.
    pub fn decoder_targets(&self) -> Vec<usize> {
        self.shift_targets(1)
    }

    /// Number of non-padding entries in [Self::decoder_targets()].
    pub fn real_target_count(&self) -> usize {
        self.decoder_targets()
            .iter()
            .filter(|&&t| t != PAD_INDEX)
            .count()
    }

    fn shift_targets(&self, offset: usize) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.targets.len());
        if self.width == 0 {
            return out;
        }
        for row in self.targets.chunks(self.width) {
            out.extend_from_slice(&row[offset..self.width - 1 + offset]);
            out.push(PAD_INDEX);
        }
        out
    }
}

fn pad_into(out: &mut Vec<usize>, row: &[usize], width: usize) {
    out.extend_from_slice(row);
    out.resize(out.len() + width - row.len(), PAD_INDEX);
}

/// Encoded melodies plus the batching and shuffling parameters of a run.
#[derive(Clone, Debug)]
pub struct Dataset {
    sequences: Vec<Vec<usize>>,
    width: usize,
    batch_size: usize,
    shuffle_window: usize,
    seed: u64,
}

impl Dataset {
    /// `batch_size` values below 1 are treated as 1.
    pub fn new(sequences: Vec<Vec<usize>>, batch_size: usize) -> Self {
        let width = sequences.iter().map(Vec::len).max().unwrap_or(0);
        Self {
            sequences,
            width,
            batch_size: batch_size.max(1),
            shuffle_window: DEFAULT_SHUFFLE_WINDOW,
            seed: 0,
        }
    }

    /// Encodes every melody through `vocab`.
    pub fn from_melodies(
        vocab: &Vocabulary,
        melodies: &[Melody],
        batch_size: usize,
    ) -> Result<Self, VocabularyError> {
        let sequences = melodies
            .iter()
            .map(|m| vocab.encode(m))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(sequences, batch_size))
    }

    pub fn with_shuffle_window(mut self, window: usize) -> Self {
        self.shuffle_window = window.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The corpus-wide maximum melody length every batch is padded to.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn shuffle_window(&self) -> usize {
        self.shuffle_window
    }

    pub fn pair_count(&self) -> usize {
        self.sequences
            .iter()
            .map(|s| s.len().saturating_sub(1))
            .sum()
    }

    /// Batches per epoch, counting the final short batch.
    pub fn batches_per_epoch(&self) -> usize {
        self.pair_count().div_ceil(self.batch_size)
    }

    /// A fresh shuffled stream of batches for `epoch`.
    pub fn epoch(&self, epoch: usize) -> impl Iterator<Item = PaddedBatch> + '_ {
        let rng = StdRng::seed_from_u64(epoch_seed(self.seed, epoch));
        let pairs = self.sequences.iter().flat_map(|s| training_pairs(s));
        let mut shuffled = ShuffleBuffer::new(pairs, self.shuffle_window, rng);
        let (batch_size, width) = (self.batch_size, self.width);
        std::iter::from_fn(move || {
            let chunk: Vec<TrainingPair> = shuffled.by_ref().take(batch_size).collect();
            (!chunk.is_empty()).then(|| PaddedBatch::new(&chunk, width))
        })
    }
}

fn epoch_seed(seed: u64, epoch: usize) -> u64 {
    seed ^ (epoch as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
