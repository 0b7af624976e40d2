//! Hyperparameters and run settings.
//!
//! Every section has serde defaults, so a config file only needs the values
//! it changes:
//! ```rust
//! # use melodist::prelude::*;
//! let cfg: MelodistConfig = serde_json::from_str(r#"{"train": {"epochs": 3}}"#).unwrap();
//! assert_eq!(cfg.train.epochs, 3);
//! assert_eq!(cfg.train.batch_size, 8);
//! assert_eq!(cfg.model.d_model, 64);
//! ```

use std::path::Path;

use melodist_core::note::NoteTiming;
use serde::{Deserialize, Serialize};

use crate::error::{MelodyError, Result};

/// Architecture of the encoder-decoder stack.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Encoder layers, and separately decoder layers.
    pub num_layers: usize,
    pub d_model: usize,
    pub num_heads: usize,
    pub d_feedforward: usize,
    /// Longest sequence the positional table covers.
    pub max_positions: usize,
    pub dropout: f64,
    /// Output classes including padding. Taken from the vocabulary.
    pub vocab_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_layers: 2,
            d_model: 64,
            num_heads: 2,
            d_feedforward: 128,
            max_positions: 1024,
            dropout: 0.1,
            vocab_size: 0,
        }
    }
}

impl ModelConfig {
    pub fn with_vocab_size(mut self, vocab_size: usize) -> Self {
        self.vocab_size = vocab_size;
        self
    }

    pub fn head_dim(&self) -> usize {
        self.d_model / self.num_heads
    }

    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("num_layers", self.num_layers),
            ("d_model", self.d_model),
            ("num_heads", self.num_heads),
            ("d_feedforward", self.d_feedforward),
            ("max_positions", self.max_positions),
            ("vocab_size", self.vocab_size),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, v)| *v == 0) {
            return Err(MelodyError::Config(format!("{name} must be positive")));
        }
        if self.d_model % self.num_heads != 0 {
            return Err(MelodyError::Config(format!(
                "d_model {} is not divisible by num_heads {}",
                self.d_model, self.num_heads
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(MelodyError::Config(format!(
                "dropout {} is outside [0, 1)",
                self.dropout
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Reorder buffer size of the windowed shuffle.
    pub shuffle_window: usize,
    /// Melodies are clipped to this many tokens before fitting.
    pub max_sequence_length: usize,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 8,
            learning_rate: 1e-3,
            shuffle_window: 1000,
            max_sequence_length: 1024,
            seed: 0,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.shuffle_window == 0 || self.max_sequence_length == 0 {
            return Err(MelodyError::Config(
                "batch_size, shuffle_window and max_sequence_length must be positive".into(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(MelodyError::Config(format!(
                "learning_rate {} must be finite and positive",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateConfig {
    /// Length of the returned melody, seed included.
    pub max_length: usize,
    /// Ends generation early once produced. `None` always runs to
    /// `max_length`.
    pub stop_token: Option<String>,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            max_length: 50,
            stop_token: None,
        }
    }
}

/// Everything a run needs, as read from a JSON config file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MelodistConfig {
    pub model: ModelConfig,
    pub train: TrainConfig,
    pub generate: GenerateConfig,
    pub timing: NoteTiming,
}

impl MelodistConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MelodyError::resource(path, format!("cannot read config: {e}")))?;
        Ok(serde_json::from_str(&text)?)
    }
}
