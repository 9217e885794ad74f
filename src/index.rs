use ndarray::prelude::*;
use rayon::prelude::*;

use crate::error::EvalError;

/// Exact nearest-neighbor index over a fixed set of embeddings.
///
/// Built once from the full reference embedding matrix and read-only
/// afterwards; there is no incremental update. Search is an exact
/// squared-Euclidean scan, so repeated queries on the same data are
/// fully deterministic.
#[derive(Debug)]
pub struct EmbeddingIndex {
    data: Array2<f32>,
}

impl EmbeddingIndex {
    pub fn new(data: Array2<f32>) -> Result<Self, EvalError> {
        if data.nrows() == 0 {
            return Err(EvalError::EmptyDataset("reference embedding set".to_owned()));
        }
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    pub fn dim(&self) -> usize {
        self.data.ncols()
    }

    /// Returns the positions of the `k` nearest reference embeddings,
    /// ordered by ascending distance. Equal distances order by ascending
    /// position. When fewer than `k` reference points exist, `k` is
    /// capped at the reference size.
    pub fn query(&self, q: ArrayView1<f32>, k: usize) -> Result<Vec<usize>, EvalError> {
        if q.len() != self.dim() {
            return Err(EvalError::DimensionMismatch { expected: self.dim(), found: q.len() });
        }

        let mut dists: Vec<(f32, usize)> = (0..self.len())
            .into_par_iter()
            .map(|i| {
                let row = self.data.row(i);
                let d = row.iter().zip(q.iter()).map(|(a, b)| (a - b) * (a - b)).sum::<f32>();
                (d, i)
            })
            .collect();

        let k = k.min(dists.len());
        if k == 0 {
            return Ok(vec![]);
        }
        let cmp = |a: &(f32, usize), b: &(f32, usize)| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));
        if k < dists.len() {
            dists.select_nth_unstable_by(k - 1, cmp);
            dists.truncate(k);
        }
        dists.sort_unstable_by(cmp);
        Ok(dists.into_iter().map(|(_, i)| i).collect())
    }
}
