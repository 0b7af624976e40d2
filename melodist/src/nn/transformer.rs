use dfdx::prelude::*;
use tracing::debug;

use super::attention::{
    try_attend_and_norm, try_feed_forward_and_norm, FeedForwardConfig, MaskedAttentionConfig,
};
use super::mask::AttentionMask;
use super::positional::PositionalEncoding;
use super::{maybe_dropout, AttnBias, Hidden, Ids, Logits};
use crate::config::ModelConfig;
use crate::error::{MelodyError, Result};

/// A single encoder layer: self attention then feed-forward, each followed
/// by a residual add and layer normalization.
#[derive(Clone, Debug, CustomModule)]
#[built(EncoderLayer)]
pub struct EncoderLayerConfig {
    #[module]
    pub self_attn: MaskedAttentionConfig,
    #[module]
    pub norm1: LayerNorm1DConfig<usize>,
    #[module]
    pub ff: FeedForwardConfig,
    #[module]
    pub norm2: LayerNorm1DConfig<usize>,
    pub dropout: f64,
}

impl EncoderLayerConfig {
    pub fn new(cfg: &ModelConfig) -> Self {
        Self {
            self_attn: MaskedAttentionConfig::new(cfg.d_model, cfg.num_heads),
            norm1: LayerNorm1DConfig(cfg.d_model),
            ff: FeedForwardConfig::new(cfg.d_model, cfg.d_feedforward),
            norm2: LayerNorm1DConfig(cfg.d_model),
            dropout: cfg.dropout,
        }
    }
}

impl<D: Device<f32>> EncoderLayer<f32, D> {
    fn try_layer<T: Tape<f32, D>>(
        &self,
        x: Hidden<D, T>,
        bias: AttnBias<D>,
        dropout: Option<f64>,
    ) -> Result<Hidden<D, T>, Error> {
        let x = try_attend_and_norm(&self.self_attn, &self.norm1, x, None, bias, dropout)?;
        try_feed_forward_and_norm(&self.ff, &self.norm2, x, dropout)
    }
}

impl<D: Device<f32>, T: Tape<f32, D>> Module<(Hidden<D, T>, AttnBias<D>)> for EncoderLayer<f32, D> {
    type Output = Hidden<D, T>;

    fn try_forward(&self, (x, bias): (Hidden<D, T>, AttnBias<D>)) -> Result<Self::Output, Error> {
        self.try_layer(x, bias, None)
    }

    fn try_forward_mut(
        &mut self,
        (x, bias): (Hidden<D, T>, AttnBias<D>),
    ) -> Result<Self::Output, Error> {
        self.try_layer(x, bias, Some(self.dropout))
    }
}

/// A single decoder layer. Masked self attention, then cross attention over
/// the encoder output, then feed-forward.
#[derive(Clone, Debug, CustomModule)]
#[built(DecoderLayer)]
pub struct DecoderLayerConfig {
    #[module]
    pub self_attn: MaskedAttentionConfig,
    #[module]
    pub norm1: LayerNorm1DConfig<usize>,
    #[module]
    pub cross_attn: MaskedAttentionConfig,
    #[module]
    pub norm2: LayerNorm1DConfig<usize>,
    #[module]
    pub ff: FeedForwardConfig,
    #[module]
    pub norm3: LayerNorm1DConfig<usize>,
    pub dropout: f64,
}

impl DecoderLayerConfig {
    pub fn new(cfg: &ModelConfig) -> Self {
        Self {
            self_attn: MaskedAttentionConfig::new(cfg.d_model, cfg.num_heads),
            norm1: LayerNorm1DConfig(cfg.d_model),
            cross_attn: MaskedAttentionConfig::new(cfg.d_model, cfg.num_heads),
            norm2: LayerNorm1DConfig(cfg.d_model),
            ff: FeedForwardConfig::new(cfg.d_model, cfg.d_feedforward),
            norm3: LayerNorm1DConfig(cfg.d_model),
            dropout: cfg.dropout,
        }
    }
}

/// Decoder input: target activations, encoder memory, self-attention bias
/// and cross-attention bias.
pub type DecoderInput<D, T> = (Hidden<D, T>, Hidden<D>, AttnBias<D>, AttnBias<D>);

impl<D: Device<f32>> DecoderLayer<f32, D> {
    fn try_layer<T: Tape<f32, D>>(
        &self,
        (tgt, mem, self_bias, cross_bias): DecoderInput<D, T>,
        dropout: Option<f64>,
    ) -> Result<Hidden<D, T>, Error> {
        let x = try_attend_and_norm(&self.self_attn, &self.norm1, tgt, None, self_bias, dropout)?;
        let x = try_attend_and_norm(
            &self.cross_attn,
            &self.norm2,
            x,
            Some(&mem),
            cross_bias,
            dropout,
        )?;
        try_feed_forward_and_norm(&self.ff, &self.norm3, x, dropout)
    }
}

impl<D: Device<f32>, T: Tape<f32, D>> Module<DecoderInput<D, T>> for DecoderLayer<f32, D> {
    type Output = Hidden<D, T>;

    fn try_forward(&self, x: DecoderInput<D, T>) -> Result<Self::Output, Error> {
        self.try_layer(x, None)
    }

    fn try_forward_mut(&mut self, x: DecoderInput<D, T>) -> Result<Self::Output, Error> {
        self.try_layer(x, Some(self.dropout))
    }
}

/// Every learned parameter of the melody model. Parameter names in saved
/// weights follow the field names, e.g. `encoder.0.self_attn.w_q.weight`.
#[derive(Clone, Debug, CustomModule)]
#[built(MelodyTransformer)]
pub struct MelodyTransformerConfig {
    #[module]
    pub src_embedding: EmbeddingConfig<usize, usize>,
    #[module]
    pub tgt_embedding: EmbeddingConfig<usize, usize>,
    #[module]
    pub encoder: Vec<EncoderLayerConfig>,
    #[module]
    pub decoder: Vec<DecoderLayerConfig>,
    #[module]
    pub head: LinearConfig<usize, usize>,
}

impl MelodyTransformerConfig {
    pub fn new(cfg: &ModelConfig) -> Self {
        let embedding = || EmbeddingConfig {
            vocab: cfg.vocab_size,
            model: cfg.d_model,
        };
        Self {
            src_embedding: embedding(),
            tgt_embedding: embedding(),
            encoder: (0..cfg.num_layers)
                .map(|_| EncoderLayerConfig::new(cfg))
                .collect(),
            decoder: (0..cfg.num_layers)
                .map(|_| DecoderLayerConfig::new(cfg))
                .collect(),
            head: LinearConfig::new(cfg.d_model, cfg.vocab_size),
        }
    }
}

/// The encoder-decoder stack together with what it needs at run time: its
/// hyperparameters, the positional table and the device.
///
/// Masks are derived from the id tensors themselves:
/// - encoder self attention and decoder cross attention block padded
///   source positions.
/// - decoder self attention blocks later positions and padded target
///   positions.
#[derive(Clone, Debug)]
pub struct MelodyModel<D: Device<f32>> {
    config: ModelConfig,
    network: MelodyTransformer<f32, D>,
    positions: PositionalEncoding,
    dev: D,
}

impl<D: Device<f32>> MelodyModel<D> {
    /// Builds a randomly initialized model.
    pub fn build(dev: &D, config: ModelConfig) -> Result<Self> {
        config.validate()?;
        let mut network: MelodyTransformer<f32, D> =
            MelodyTransformerConfig::new(&config).try_build_on_device(dev)?;
        network.try_reset_params()?;
        debug!(?config, "built melody transformer");
        Ok(Self {
            config,
            network,
            positions: PositionalEncoding::new(config.max_positions, config.d_model),
            dev: dev.clone(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn network(&self) -> &MelodyTransformer<f32, D> {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut MelodyTransformer<f32, D> {
        &mut self.network
    }

    pub fn device(&self) -> &D {
        &self.dev
    }

    pub fn positions(&self) -> &PositionalEncoding {
        &self.positions
    }

    /// Uploads `(batch, ids.len() / batch)` token indices, rejecting indices
    /// outside the vocabulary.
    pub fn ids(&self, ids: &[usize], batch: usize) -> Result<Ids<D>> {
        if batch == 0 || ids.len() % batch != 0 {
            return Err(MelodyError::Shape(format!(
                "{} ids cannot be split into {batch} rows",
                ids.len()
            )));
        }
        if let Some(&index) = ids.iter().find(|&&i| i >= self.config.vocab_size) {
            return Err(melodist_core::error::VocabularyError::IndexOutOfRange {
                index,
                size_with_padding: self.config.vocab_size,
            }
            .into());
        }
        let shape = (batch, ids.len() / batch);
        Ok(self.dev.try_tensor_from_vec(ids.to_vec(), shape)?)
    }

    /// Inference forward pass, without dropout.
    pub fn forward(&self, src: Ids<D>, tgt: Ids<D>) -> Result<Logits<D>> {
        self.try_run(src, tgt, None)
    }

    /// Training forward pass, with dropout. The tape rides in on `src`.
    pub fn forward_mut<T: Tape<f32, D>>(
        &mut self,
        src: Ids<D, T>,
        tgt: Ids<D>,
    ) -> Result<Logits<D, T>> {
        let dropout = Some(self.config.dropout);
        self.try_run(src, tgt, dropout)
    }

    fn try_run<T: Tape<f32, D>>(
        &self,
        src: Ids<D, T>,
        tgt: Ids<D>,
        dropout: Option<f64>,
    ) -> Result<Logits<D, T>> {
        let (batch, src_len) = *src.shape();
        let (tgt_batch, tgt_len) = *tgt.shape();
        if batch != tgt_batch {
            return Err(MelodyError::Shape(format!(
                "source batch {batch} and target batch {tgt_batch} differ"
            )));
        }
        let heads = self.config.num_heads;
        let src_ids = src.as_vec();
        let tgt_ids = tgt.as_vec();

        let enc_bias = AttentionMask::padding(&src_ids, batch, src_len)?.to_bias(&self.dev, heads)?;
        let cross_bias =
            AttentionMask::padding(&src_ids, batch, tgt_len)?.to_bias(&self.dev, heads)?;
        let self_bias = AttentionMask::look_ahead(batch, tgt_len)
            .union(&AttentionMask::padding(&tgt_ids, batch, tgt_len)?)?
            .to_bias(&self.dev, heads)?;

        let mut x = self.try_embed(&self.network.src_embedding, src, dropout)?;
        for layer in self.network.encoder.iter() {
            x = layer.try_layer(x, enc_bias.clone(), dropout)?;
        }

        let (mem, tape) = x.split_tape();
        let mut y = self.try_embed(&self.network.tgt_embedding, tgt.put_tape(tape), dropout)?;
        for layer in self.network.decoder.iter() {
            y = layer.try_layer((y, mem.clone(), self_bias.clone(), cross_bias.clone()), dropout)?;
        }
        Ok(self.network.head.try_forward(y)?)
    }

    /// Scaled token embedding plus positional encoding.
    fn try_embed<T: Tape<f32, D>>(
        &self,
        embedding: &Embedding<usize, usize, f32, D>,
        ids: Ids<D, T>,
        dropout: Option<f64>,
    ) -> Result<Hidden<D, T>> {
        let (batch, seq_len) = *ids.shape();
        let scale = (self.config.d_model as f64).sqrt();
        let pe = self.positions.try_expand(&self.dev, batch, seq_len)?;
        let x = embedding.try_forward(ids)?.try_mul(scale)?.try_add(pe)?;
        Ok(maybe_dropout(x, dropout)?)
    }
}
