//! # melodist
//!
//! Melody generation with a masked encoder-decoder transformer, trained with
//! teacher forcing and decoded greedily. The data pipeline lives in
//! [melodist_core]; this crate holds everything that touches tensors.
//!
//! # Building a model
//!
//! *See [nn::transformer] for more information.*
//!
//! A model is built from a [config::ModelConfig] whose `vocab_size` comes from
//! a fitted [Vocabulary](melodist_core::vocab::Vocabulary):
//!
//! ```rust
//! # use melodist::prelude::*;
//! let corpus = vec![Melody::parse_record("C4-1.0, E4-1.0, G4-1.0").unwrap()];
//! let vocab = Vocabulary::fit(&corpus);
//! let config = ModelConfig {
//!     d_model: 8,
//!     d_feedforward: 16,
//!     max_positions: 16,
//!     ..Default::default()
//! }
//! .with_vocab_size(vocab.size_with_padding());
//! let dev: Cpu = Default::default();
//! let model = MelodyModel::build(&dev, config).unwrap();
//! assert_eq!(model.config().vocab_size, 4);
//! ```
//!
//! # Training
//!
//! *See [train] and [loss] for more information.*
//!
//! [train::Trainer] runs one teacher-forced forward pass, the padding-masked
//! cross entropy, backpropagation and one Adam update per batch.
//!
//! # Generating
//!
//! *See [generate] for more information.*
//!
//! [generate::Generator] extends a seed one argmax token at a time, feeding
//! the growing melody to both the encoder and the decoder.
//!
//! # Persisting
//!
//! *See [artifact] for more information.*
//!
//! The trained parameters and the vocabulary they were trained against are
//! saved together and rejected together if they disagree.

pub mod artifact;
pub mod config;
pub mod error;
pub mod generate;
pub mod loss;
pub mod midi;
pub mod nn;
pub mod train;

pub mod prelude {
    pub use crate::artifact::ModelArtifact;
    pub use crate::config::{GenerateConfig, MelodistConfig, ModelConfig, TrainConfig};
    pub use crate::error::{MelodyError, Result};
    pub use crate::generate::{GenerationRun, GenerationState, Generator};
    pub use crate::loss::masked_cross_entropy;
    pub use crate::midi::{melody_to_smf, write_midi, ExportSummary};
    pub use crate::nn::mask::AttentionMask;
    pub use crate::nn::positional::PositionalEncoding;
    pub use crate::nn::transformer::MelodyModel;
    pub use crate::train::{Trainer, TrainingReport};
    pub use dfdx::tensor::Cpu;
    pub use melodist_core::prelude::*;
}

#[cfg(test)]
pub(crate) mod tests {
    pub type TestDevice = dfdx::tensor::Cpu;

    pub fn assert_close(lhs: f32, rhs: f32, tolerance: f32) {
        if (lhs - rhs).abs() > tolerance {
            panic!("lhs != rhs | {lhs} != {rhs}");
        }
    }

    pub fn assert_all_close(lhs: &[f32], rhs: &[f32], tolerance: f32) {
        assert_eq!(lhs.len(), rhs.len(), "lengths differ");
        for (l, r) in lhs.iter().zip(rhs) {
            if (l - r).abs() > tolerance {
                panic!("lhs != rhs | {l} != {r}\n\n{lhs:?}\n\n{rhs:?}");
            }
        }
    }
}
