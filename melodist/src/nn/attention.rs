use dfdx::prelude::*;

use super::{maybe_dropout, AttnBias, Hidden};

/// Scaled dot-product attention weights.
///
/// `q` is `(batch, heads, queries, head_dim)`, `k_t` is the transposed keys
/// `(batch, heads, head_dim, keys)`. Returns
/// `softmax(q · k_t / sqrt(head_dim) + bias)` over the key axis.
pub fn try_attention_weights<D: Device<f32>, T: Tape<f32, D>>(
    q: Tensor<(usize, usize, usize, usize), f32, D, T>,
    k_t: Tensor<(usize, usize, usize, usize), f32, D, T>,
    bias: AttnBias<D>,
) -> Result<Tensor<(usize, usize, usize, usize), f32, D, T>, Error> {
    let head_dim = q.shape().3;
    let scalar = 1.0 / (head_dim as f64).sqrt();
    let scores = q.try_matmul(k_t)?.try_mul(scalar)?;
    scores.try_add(bias)?.try_softmax::<Axis<3>>()
}

/// Multi-head attention with an additive mask.
#[derive(Clone, Debug, CustomModule)]
#[built(MaskedAttention)]
pub struct MaskedAttentionConfig {
    #[module]
    pub w_q: LinearConfig<usize, usize>,
    #[module]
    pub w_k: LinearConfig<usize, usize>,
    #[module]
    pub w_v: LinearConfig<usize, usize>,
    #[module]
    pub w_o: LinearConfig<usize, usize>,
    pub d_model: usize,
    pub num_heads: usize,
}

impl MaskedAttentionConfig {
    /// `num_heads` must divide `d_model`.
    pub fn new(d_model: usize, num_heads: usize) -> Self {
        Self {
            w_q: LinearConfig::new(d_model, d_model),
            w_k: LinearConfig::new(d_model, d_model),
            w_v: LinearConfig::new(d_model, d_model),
            w_o: LinearConfig::new(d_model, d_model),
            d_model,
            num_heads,
        }
    }
}

impl<D: Device<f32>, T: Tape<f32, D>> Module<(Hidden<D, T>, Hidden<D>, AttnBias<D>)>
    for MaskedAttention<f32, D>
{
    type Output = Hidden<D, T>;

    /// Queries carry the tape; keys and values are the same `kv` sequence.
    fn try_forward(
        &self,
        (q, kv, bias): (Hidden<D, T>, Hidden<D>, AttnBias<D>),
    ) -> Result<Self::Output, Error> {
        let (b, s1, _) = *q.shape();
        let s2 = kv.shape().1;
        let h = self.num_heads;
        let head_dim = self.d_model / h;

        let v = self.w_v.try_forward(kv.retaped::<T>())?;
        let v = v.try_reshape_like(&(b, s2, h, head_dim))?;
        let v = v.try_permute::<_, Axes4<0, 2, 1, 3>>()?;

        let k = self.w_k.try_forward(kv.retaped::<T>())?;
        let k = k.try_reshape_like(&(b, s2, h, head_dim))?;
        let k = k.try_permute::<_, Axes4<0, 2, 3, 1>>()?;

        let q = self.w_q.try_forward(q)?;
        let q = q.try_reshape_like(&(b, s1, h, head_dim))?;
        let q = q.try_permute::<_, Axes4<0, 2, 1, 3>>()?;

        let weights = try_attention_weights(q, k, bias)?;

        let tokens = weights.try_matmul(v)?;
        let tokens = tokens.try_permute::<_, Axes4<0, 2, 1, 3>>()?;
        let tokens = tokens.try_reshape_like(&(b, s1, self.d_model))?;

        self.w_o.try_forward(tokens)
    }
}

/// Position-wise feed-forward block.
#[derive(Clone, Debug, Sequential)]
#[built(FeedForward)]
pub struct FeedForwardConfig {
    pub l1: LinearConfig<usize, usize>,
    pub act: ReLU,
    pub l2: LinearConfig<usize, usize>,
}

impl FeedForwardConfig {
    pub fn new(d_model: usize, d_feedforward: usize) -> Self {
        Self {
            l1: LinearConfig::new(d_model, d_feedforward),
            act: ReLU,
            l2: LinearConfig::new(d_feedforward, d_model),
        }
    }
}

/// One self-attention sublayer: attention, dropout, residual add, norm.
pub(crate) fn try_attend_and_norm<D: Device<f32>, T: Tape<f32, D>>(
    attn: &MaskedAttention<f32, D>,
    norm: &LayerNorm1D<usize, f32, D>,
    x: Hidden<D, T>,
    kv: Option<&Hidden<D>>,
    bias: AttnBias<D>,
    dropout: Option<f64>,
) -> Result<Hidden<D, T>, Error> {
    let (x, tape) = x.split_tape();
    let residual = x.clone();
    let kv = kv.cloned().unwrap_or_else(|| x.clone());
    let y = attn.try_forward((x.put_tape(tape), kv, bias))?;
    let y = maybe_dropout(y, dropout)?;
    norm.try_forward(y.try_add(residual)?)
}

/// The feed-forward sublayer: dense block, dropout, residual add, norm.
pub(crate) fn try_feed_forward_and_norm<D: Device<f32>, T: Tape<f32, D>>(
    ff: &FeedForward<f32, D>,
    norm: &LayerNorm1D<usize, f32, D>,
    x: Hidden<D, T>,
    dropout: Option<f64>,
) -> Result<Hidden<D, T>, Error> {
    let (x, tape) = x.split_tape();
    let residual = x.clone();
    let y = ff.try_forward(x.put_tape(tape))?;
    let y = maybe_dropout(y, dropout)?;
    norm.try_forward(y.try_add(residual)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::mask::AttentionMask;
    use crate::tests::*;

    #[test]
    fn test_look_ahead_weights_are_zero_above_diagonal() {
        let dev = TestDevice::seed_from_u64(0);
        let (b, h, s, d) = (2, 2, 5, 4);
        let q: Tensor<(usize, usize, usize, usize), f32, _> =
            dev.sample_normal_like(&(b, h, s, d));
        let k_t: Tensor<(usize, usize, usize, usize), f32, _> =
            dev.sample_normal_like(&(b, h, d, s));
        let bias = AttentionMask::look_ahead(b, s).to_bias(&dev, h).unwrap();

        let w = try_attention_weights(q, k_t, bias).unwrap().as_vec();
        for plane in w.chunks(s * s) {
            for i in 0..s {
                let row = &plane[i * s..(i + 1) * s];
                assert_close(row.iter().sum::<f32>(), 1.0, 1e-5);
                for (j, &x) in row.iter().enumerate().skip(i + 1) {
                    assert!(x.abs() < 1e-12, "weight {i}->{j} = {x}");
                }
            }
        }
    }

    #[test]
    fn test_padded_keys_get_no_weight() {
        let dev = TestDevice::seed_from_u64(1);
        let ids = [4, 2, 0, 0];
        let bias = AttentionMask::padding(&ids, 1, 4)
            .unwrap()
            .to_bias(&dev, 1)
            .unwrap();
        let q: Tensor<(usize, usize, usize, usize), f32, _> = dev.sample_normal_like(&(1, 1, 4, 3));
        let k_t: Tensor<(usize, usize, usize, usize), f32, _> =
            dev.sample_normal_like(&(1, 1, 3, 4));
        let w = try_attention_weights(q, k_t, bias).unwrap().as_vec();
        for row in w.chunks(4) {
            assert!(row[2] < 1e-12 && row[3] < 1e-12);
        }
    }

    #[test]
    fn test_masked_attention_shapes() {
        let dev = TestDevice::seed_from_u64(2);
        let attn = dev.build_module::<f32>(MaskedAttentionConfig::new(8, 2));
        let q: Hidden<_> = dev.sample_normal_like(&(3, 4, 8));
        let kv: Hidden<_> = dev.sample_normal_like(&(3, 6, 8));
        let bias = AttentionMask::open(3, 4, 6).to_bias(&dev, 2).unwrap();
        let y = attn.forward((q, kv, bias));
        assert_eq!(*y.shape(), (3, 4, 8));
    }

    #[test]
    fn test_open_mask_matches_plain_softmax() {
        let dev = TestDevice::seed_from_u64(3);
        let q: Tensor<(usize, usize, usize, usize), f32, _> = dev.sample_normal_like(&(1, 1, 2, 4));
        let k_t: Tensor<(usize, usize, usize, usize), f32, _> =
            dev.sample_normal_like(&(1, 1, 4, 3));
        let bias = AttentionMask::open(1, 2, 3).to_bias(&dev, 1).unwrap();
        let expected = q
            .clone()
            .matmul(k_t.clone())
            .mul(0.5)
            .softmax::<Axis<3>>()
            .as_vec();
        let actual = try_attention_weights(q, k_t, bias).unwrap().as_vec();
        assert_all_close(&actual, &expected, 1e-6);
    }
}
