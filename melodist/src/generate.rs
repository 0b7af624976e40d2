//! Greedy autoregressive decoding.
//!
//! A run moves through [GenerationState]:
//! `Seeded -> Generating -> Complete`, or `-> Stopped` when a configured stop
//! token is produced. Every step feeds the whole melody so far to both the
//! encoder and the decoder, and appends the highest scoring token at the last
//! position.
//!
//! The parameters are only read, so a caller may drop a [GenerationRun]
//! between steps at any time.

use dfdx::prelude::*;
use melodist_core::error::VocabularyError;
use melodist_core::token::{Melody, Token};
use melodist_core::vocab::Vocabulary;
use melodist_core::PAD_INDEX;
use tracing::{debug, info};

use crate::config::GenerateConfig;
use crate::error::{MelodyError, Result};
use crate::nn::transformer::MelodyModel;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationState {
    /// The seed is encoded and nothing has been appended yet.
    Seeded,
    Generating,
    /// The melody reached `max_length`.
    Complete,
    /// The stop token was produced.
    Stopped,
}

impl GenerationState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Complete | Self::Stopped)
    }
}

/// Index of the highest score, ignoring [PAD_INDEX]. Ties go to the lowest
/// index and NaN scores never win.
pub fn greedy_pick(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &s) in scores.iter().enumerate().skip(PAD_INDEX + 1) {
        if s.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if s <= b => {}
            _ => best = Some((i, s)),
        }
    }
    best.map(|(i, _)| i)
}

/// A trained model paired with the vocabulary it was trained against.
#[derive(Debug)]
pub struct Generator<'a, D: Device<f32>> {
    model: &'a MelodyModel<D>,
    vocab: &'a Vocabulary,
    max_length: usize,
    stop: Option<usize>,
}

impl<'a, D: Device<f32>> Generator<'a, D> {
    /// Fails if the vocabulary and the model disagree on size, if
    /// `max_length` is beyond the positional table, or if the stop token is
    /// not in the vocabulary.
    pub fn new(
        model: &'a MelodyModel<D>,
        vocab: &'a Vocabulary,
        config: &GenerateConfig,
    ) -> Result<Self> {
        vocab.check_size(model.config().vocab_size)?;
        if vocab.is_empty() {
            return Err(MelodyError::Config("cannot generate from an empty vocabulary".into()));
        }
        let max_positions = model.config().max_positions;
        if config.max_length > max_positions {
            return Err(MelodyError::Config(format!(
                "max_length {} exceeds max_positions {max_positions}",
                config.max_length
            )));
        }
        let stop = match &config.stop_token {
            None => None,
            Some(raw) => {
                let token = Token::parse(raw)?;
                let index = vocab.index_of(&token).ok_or_else(|| {
                    MelodyError::Config(format!("stop token {token} is not in the vocabulary"))
                })?;
                Some(index)
            }
        };
        Ok(Self {
            model,
            vocab,
            max_length: config.max_length,
            stop,
        })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Encodes `seed` and returns a run positioned before the first step.
    pub fn start(&self, seed: &Melody) -> Result<GenerationRun<'_, 'a, D>> {
        if seed.is_empty() {
            return Err(VocabularyError::EmptyMelody.into());
        }
        let sequence = self.vocab.encode(seed)?;
        let state = if sequence.len() >= self.max_length {
            GenerationState::Complete
        } else {
            GenerationState::Seeded
        };
        Ok(GenerationRun {
            generator: self,
            seed_len: sequence.len(),
            sequence,
            state,
        })
    }

    /// Extends `seed` to `max_length` tokens, or until the stop token. The
    /// seed is kept verbatim as the prefix of the result.
    pub fn generate(&self, seed: &Melody) -> Result<Melody> {
        self.start(seed)?.finish()
    }
}

/// One generation in progress.
#[derive(Debug)]
pub struct GenerationRun<'g, 'a, D: Device<f32>> {
    generator: &'g Generator<'a, D>,
    sequence: Vec<usize>,
    seed_len: usize,
    state: GenerationState,
}

impl<'g, 'a, D: Device<f32>> GenerationRun<'g, 'a, D> {
    pub fn state(&self) -> GenerationState {
        self.state
    }

    /// Encoded melody so far, seed included.
    pub fn sequence(&self) -> &[usize] {
        &self.sequence
    }

    /// Tokens appended after the seed.
    pub fn generated(&self) -> usize {
        self.sequence.len() - self.seed_len
    }

    /// Runs one forward pass and appends its argmax. Returns `None` once the
    /// run is finished.
    pub fn step(&mut self) -> Result<Option<usize>> {
        if self.state.is_finished() {
            return Ok(None);
        }
        self.state = GenerationState::Generating;

        let model = self.generator.model;
        let len = self.sequence.len();
        let src = model.ids(&self.sequence, 1)?;
        let tgt = model.ids(&self.sequence, 1)?;
        let logits = model.forward(src, tgt)?.as_vec();
        let vocab_size = model.config().vocab_size;
        let last = &logits[(len - 1) * vocab_size..len * vocab_size];
        let next = greedy_pick(last).ok_or_else(|| {
            MelodyError::Shape(format!("no token to pick from {vocab_size} logits"))
        })?;

        self.sequence.push(next);
        debug!(position = len, index = next, "generated token");

        if Some(next) == self.generator.stop {
            self.state = GenerationState::Stopped;
        } else if self.sequence.len() >= self.generator.max_length {
            self.state = GenerationState::Complete;
        }
        Ok(Some(next))
    }

    /// Steps to the end and decodes the melody.
    pub fn finish(mut self) -> Result<Melody> {
        while self.step()?.is_some() {}
        info!(
            seed = self.seed_len,
            generated = self.generated(),
            state = ?self.state,
            "generation finished"
        );
        Ok(self.generator.vocab.decode(&self.sequence)?)
    }
}
