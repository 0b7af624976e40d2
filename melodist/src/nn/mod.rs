//! The numeric side: masks, attention, positional encoding and the
//! encoder-decoder stack.
//!
//! Every tensor in the stack has runtime dimensions, since sequence length
//! and vocabulary size are only known once a corpus has been read.

pub mod attention;
pub mod mask;
pub mod positional;
pub mod transformer;

use dfdx::prelude::*;

/// `(batch, seq, d_model)` activations.
pub type Hidden<D, T = NoneTape> = Tensor<(usize, usize, usize), f32, D, T>;

/// `(batch, seq)` token indices.
pub type Ids<D, T = NoneTape> = Tensor<(usize, usize), usize, D, T>;

/// `(batch, heads, queries, keys)` additive attention bias.
pub type AttnBias<D> = Tensor<(usize, usize, usize, usize), f32, D>;

/// `(batch, seq, vocab)` unnormalized scores.
pub type Logits<D, T = NoneTape> = Tensor<(usize, usize, usize), f32, D, T>;

/// Applies dropout when training, is the identity otherwise.
pub(crate) fn maybe_dropout<D: Device<f32>, T: Tape<f32, D>>(
    x: Hidden<D, T>,
    p: Option<f64>,
) -> Result<Hidden<D, T>, Error> {
    match p {
        Some(p) if p > 0.0 => x.try_dropout(p),
        _ => Ok(x),
    }
}
