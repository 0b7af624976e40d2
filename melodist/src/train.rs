//! Teacher-forced training.
//!
//! One step is the usual dfdx loop body:
//! ```ignore
//! let logits = model.forward_mut(x.traced(grads));
//! grads = loss.backward();
//! opt.update(&mut model, &grads)?;
//! model.zero_grads(&mut grads);
//! ```
//! with the masked loss from [crate::loss] in the middle.

use dfdx::nn::optim::{Adam, AdamConfig};
use dfdx::prelude::*;
use melodist_core::dataset::{Dataset, PaddedBatch};
use tracing::{debug, info};

use crate::config::TrainConfig;
use crate::error::{MelodyError, Result};
use crate::loss::masked_cross_entropy;
use crate::nn::transformer::{MelodyModel, MelodyTransformer};

/// Mean loss of every epoch, in order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingReport {
    pub epoch_losses: Vec<f32>,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f32> {
        self.epoch_losses.last().copied()
    }
}

/// Owns the model while it trains. The optimizer is the only writer of the
/// parameters and every update completes before the next batch is read.
pub struct Trainer<D: Device<f32>> {
    model: MelodyModel<D>,
    optimizer: Adam<MelodyTransformer<f32, D>, f32, D>,
    grads: Option<Gradients<f32, D>>,
    steps: usize,
}

impl<D: Device<f32>> Trainer<D> {
    pub fn new(model: MelodyModel<D>, learning_rate: f64) -> Self {
        let optimizer = Adam::new(
            model.network(),
            AdamConfig {
                lr: learning_rate,
                ..Default::default()
            },
        );
        Self {
            model,
            optimizer,
            grads: None,
            steps: 0,
        }
    }

    pub fn from_config(model: MelodyModel<D>, config: &TrainConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(model, config.learning_rate))
    }

    pub fn model(&self) -> &MelodyModel<D> {
        &self.model
    }

    pub fn into_model(self) -> MelodyModel<D> {
        self.model
    }

    /// Optimizer updates applied so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Runs one batch and applies one optimizer update. Returns the batch
    /// loss.
    ///
    /// The encoder sees the prefix, the decoder sees the target shifted right
    /// and the loss compares against the target shifted left. An error leaves
    /// the parameters untouched for this batch.
    pub fn train_step(&mut self, batch: &PaddedBatch) -> Result<f32> {
        let (rows, _) = batch.shape();
        let src = self.model.ids(batch.inputs(), rows)?;
        let tgt = self.model.ids(&batch.decoder_inputs(), rows)?;

        let grads = match self.grads.take() {
            Some(grads) => grads,
            None => self.model.network().try_alloc_grads()?,
        };
        let logits = self.model.forward_mut(src.traced(grads), tgt)?;
        let loss = masked_cross_entropy(self.model.device(), logits, &batch.decoder_targets())?;
        let value = loss.array();

        let mut grads = loss.backward();
        self.optimizer.update(self.model.network_mut(), &grads)?;
        self.model.network_mut().try_zero_grads(&mut grads)?;
        self.grads = Some(grads);
        self.steps += 1;
        Ok(value)
    }

    /// Trains for `epochs` passes over `dataset`, one batch at a time.
    pub fn fit(&mut self, dataset: &Dataset, epochs: usize) -> Result<TrainingReport> {
        let max_positions = self.model.config().max_positions;
        if dataset.width() > max_positions {
            return Err(MelodyError::Config(format!(
                "dataset width {} exceeds max_positions {max_positions}",
                dataset.width()
            )));
        }
        info!(
            pairs = dataset.pair_count(),
            batches = dataset.batches_per_epoch(),
            width = dataset.width(),
            epochs,
            "starting training"
        );

        let mut report = TrainingReport::default();
        for epoch in 0..epochs {
            let mut total = 0.0;
            let mut batches = 0;
            for (i, batch) in dataset.epoch(epoch).enumerate() {
                let loss = self.train_step(&batch)?;
                debug!(epoch, batch = i, rows = batch.len(), loss, "trained batch");
                total += loss;
                batches += 1;
            }
            let mean = if batches == 0 { 0.0 } else { total / batches as f32 };
            info!(epoch, batches, loss = mean, "finished epoch");
            report.epoch_losses.push(mean);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::tests::*;
    use melodist_core::dataset::{training_pairs, TrainingPair};

    fn tiny_model(dev: &TestDevice, vocab_size: usize) -> MelodyModel<TestDevice> {
        let config = ModelConfig {
            num_layers: 1,
            d_model: 8,
            num_heads: 2,
            d_feedforward: 16,
            max_positions: 16,
            dropout: 0.0,
            vocab_size,
        };
        MelodyModel::build(dev, config).unwrap()
    }

    #[test]
    fn test_repeated_steps_reduce_loss() {
        let dev = TestDevice::seed_from_u64(0);
        let mut trainer = Trainer::new(tiny_model(&dev, 5), 1e-2);
        let pairs: Vec<TrainingPair> = training_pairs(&[1, 2, 3, 4]).collect();
        let batch = PaddedBatch::new(&pairs, 4);

        let first = trainer.train_step(&batch).unwrap();
        let mut last = first;
        for _ in 0..30 {
            last = trainer.train_step(&batch).unwrap();
        }
        assert!(first.is_finite() && last.is_finite());
        assert!(last < first, "{last} >= {first}");
        assert_eq!(trainer.steps(), 31);
    }

    #[test]
    fn test_step_rejects_unknown_indices() {
        let dev = TestDevice::seed_from_u64(0);
        let mut trainer = Trainer::new(tiny_model(&dev, 3), 1e-3);
        let batch = PaddedBatch::new(&training_pairs(&[1, 7]).collect::<Vec<_>>(), 2);
        assert!(matches!(
            trainer.train_step(&batch),
            Err(MelodyError::Vocabulary(_))
        ));
        assert_eq!(trainer.steps(), 0);
    }

    #[test]
    fn test_fit_reports_every_epoch() {
        let dev = TestDevice::seed_from_u64(1);
        let dataset = Dataset::new(vec![vec![1, 2, 3], vec![3, 2, 1, 2]], 2).with_seed(7);
        let mut trainer = Trainer::new(tiny_model(&dev, 4), 1e-3);
        let report = trainer.fit(&dataset, 3).unwrap();
        assert_eq!(report.epoch_losses.len(), 3);
        assert!(report.epoch_losses.iter().all(|l| l.is_finite() && *l > 0.0));
        assert_eq!(trainer.steps(), 3 * dataset.batches_per_epoch());
    }

    #[test]
    fn test_fit_rejects_wide_dataset() {
        let dev = TestDevice::seed_from_u64(1);
        let dataset = Dataset::new(vec![(1..=20).map(|i| i % 3 + 1).collect()], 4);
        let mut trainer = Trainer::new(tiny_model(&dev, 4), 1e-3);
        assert!(matches!(
            trainer.fit(&dataset, 1),
            Err(MelodyError::Config(_))
        ));
    }
}
