use dfdx::prelude::*;

use super::Hidden;
use crate::error::{MelodyError, Result};

/// Fixed sinusoidal position table.
///
/// Dimension `j` of position `p` is `sin(p / 10000^(2i / d_model))` for even
/// `j` and `cos` of the same angle for odd `j`, where `i = j / 2`. Nothing
/// here is learned, so the table only depends on `(max_positions, d_model)`.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionalEncoding {
    max_positions: usize,
    d_model: usize,
    table: Vec<f32>,
}

impl PositionalEncoding {
    pub fn new(max_positions: usize, d_model: usize) -> Self {
        let mut table = Vec::with_capacity(max_positions * d_model);
        for pos in 0..max_positions {
            for j in 0..d_model {
                let exponent = (2 * (j / 2)) as f64 / d_model as f64;
                let angle = pos as f64 / 10000f64.powf(exponent);
                let value = if j % 2 == 0 { angle.sin() } else { angle.cos() };
                table.push(value as f32);
            }
        }
        Self {
            max_positions,
            d_model,
            table,
        }
    }

    pub fn max_positions(&self) -> usize {
        self.max_positions
    }

    pub fn d_model(&self) -> usize {
        self.d_model
    }

    /// The encoding of one position.
    pub fn row(&self, pos: usize) -> Option<&[f32]> {
        let width = self.d_model;
        (pos < self.max_positions).then(|| &self.table[pos * width..(pos + 1) * width])
    }

    /// The `(batch, seq_len, d_model)` addend for a batch of sequences.
    pub fn try_expand<D: Device<f32>>(
        &self,
        dev: &D,
        batch: usize,
        seq_len: usize,
    ) -> Result<Hidden<D>> {
        if seq_len > self.max_positions {
            return Err(MelodyError::Shape(format!(
                "sequence length {seq_len} exceeds the {} encoded positions",
                self.max_positions
            )));
        }
        let rows = &self.table[..seq_len * self.d_model];
        let mut data = Vec::with_capacity(batch * rows.len());
        for _ in 0..batch {
            data.extend_from_slice(rows);
        }
        Ok(dev.try_tensor_from_vec(data, (batch, seq_len, self.d_model))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    #[test]
    fn test_known_values() {
        let pe = PositionalEncoding::new(8, 4);
        assert_all_close(pe.row(0).unwrap(), &[0.0, 1.0, 0.0, 1.0], 1e-7);
        let row = pe.row(1).unwrap();
        assert_close(row[0], 1f32.sin(), 1e-6);
        assert_close(row[1], 1f32.cos(), 1e-6);
        assert_close(row[2], 0.01f32.sin(), 1e-6);
        assert_close(row[3], 0.01f32.cos(), 1e-6);
        assert!(pe.row(8).is_none());
    }

    #[test]
    fn test_rebuild_is_identical() {
        assert_eq!(PositionalEncoding::new(64, 16), PositionalEncoding::new(64, 16));
    }

    #[test]
    fn test_expand() {
        let dev: TestDevice = Default::default();
        let pe = PositionalEncoding::new(5, 2);
        let t = pe.try_expand(&dev, 2, 3).unwrap();
        assert_eq!(*t.shape(), (2, 3, 2));
        let v = t.as_vec();
        assert_eq!(v[..6], v[6..]);
        assert!(matches!(
            pe.try_expand(&dev, 1, 6),
            Err(MelodyError::Shape(_))
        ));
    }
}
