use std::time::Instant;

use anyhow::Result;
use log::info;
use ndarray::prelude::*;

use crate::error::EvalError;
use crate::index::EmbeddingIndex;

/// How many neighbors to retrieve per query image.
pub const DEFAULT_NEIGHBORS: usize = 30;

/// Scores how well embeddings cluster by class.
///
/// For each query image, the k nearest reference embeddings are
/// retrieved by Euclidean distance and the local accuracy is the
/// fraction of their labels matching the query's true label. The
/// aggregate accuracy is the arithmetic mean over all query images.
///
/// Training accuracy queries the reference set against itself, so
/// every query image retrieves its own embedding at distance zero.
/// That self-match inflates the metric; it is kept to stay comparable
/// with the original procedure and should be read as an optimistic
/// bound rather than a leave-one-out estimate.
#[derive(Debug)]
pub struct RetrievalEvaluator {
    index: EmbeddingIndex,
    labels: Vec<i64>,
    neighbors: usize,
}

impl RetrievalEvaluator {
    pub fn new(
        embeddings: Array2<f32>,
        labels: Vec<i64>,
        neighbors: usize,
    ) -> Result<Self, EvalError> {
        if labels.len() != embeddings.nrows() {
            return Err(EvalError::LabelCount { labels: labels.len(), rows: embeddings.nrows() });
        }
        let index = EmbeddingIndex::new(embeddings)?;
        Ok(Self { index, labels, neighbors })
    }

    pub fn reference_len(&self) -> usize {
        self.index.len()
    }

    pub fn neighbors(&self) -> usize {
        self.neighbors
    }

    /// Accuracy for a single query image: matching labels among the
    /// retrieved neighbors, divided by the number retrieved. Always in
    /// [0, 1]. With fewer reference points than `neighbors`, the
    /// retrieved count caps at the reference size.
    pub fn local_accuracy(&self, embedding: ArrayView1<f32>, label: i64) -> Result<f64, EvalError> {
        let ids = self.index.query(embedding, self.neighbors)?;
        if ids.is_empty() {
            return Err(EvalError::EmptyDataset("retrieved neighbor set".to_owned()));
        }
        let hits = ids.iter().filter(|&&i| self.labels[i] == label).count();
        Ok(hits as f64 / ids.len() as f64)
    }

    /// Mean local accuracy over a stream of embedding batches.
    ///
    /// Reports running accuracy every 1000 images and the elapsed time
    /// for the first 1000, matching the original console contract.
    pub fn average_accuracy<I>(&self, batches: I) -> Result<f64>
    where
        I: IntoIterator<Item = Result<(Array2<f32>, Vec<i64>)>>,
    {
        let mut total = 0f64;
        let mut count = 0usize;
        let start = Instant::now();

        for batch in batches {
            let (embeddings, labels) = batch?;
            if labels.len() != embeddings.nrows() {
                return Err(EvalError::LabelCount {
                    labels: labels.len(),
                    rows: embeddings.nrows(),
                }
                .into());
            }
            for (row, &label) in embeddings.outer_iter().zip(&labels) {
                total += self.local_accuracy(row, label)?;
                count += 1;
                if count % 1000 == 0 {
                    info!("[images: {}] accuracy: {:.5}", count, total / count as f64);
                }
                if count == 1000 {
                    info!("{:.2} seconds for 1000 images", start.elapsed().as_secs_f64());
                }
            }
        }

        if count == 0 {
            return Err(EvalError::EmptyDataset("query set".to_owned()).into());
        }
        Ok(total / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;

    fn evaluator(rows: &[&[f32]], labels: &[i64], neighbors: usize) -> RetrievalEvaluator {
        let dim = rows[0].len();
        let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        let embeddings = Array2::from_shape_vec((rows.len(), dim), flat).unwrap();
        RetrievalEvaluator::new(embeddings, labels.to_vec(), neighbors).unwrap()
    }

    #[test]
    fn test_label_count_checked() {
        let embeddings = Array2::<f32>::zeros((3, 4));
        let err = RetrievalEvaluator::new(embeddings, vec![0, 1], 30).unwrap_err();
        assert!(matches!(err, EvalError::LabelCount { labels: 2, rows: 3 }));
    }

    #[test]
    fn test_empty_reference_rejected() {
        let err = RetrievalEvaluator::new(Array2::<f32>::zeros((0, 4)), vec![], 30).unwrap_err();
        assert!(matches!(err, EvalError::EmptyDataset(_)));
    }

    #[rstest]
    #[case(&[0, 0, 1, 1], 0)]
    #[case(&[0, 0, 1, 1], 1)]
    #[case(&[2, 2, 2, 2], 7)]
    fn test_local_accuracy_in_unit_interval(#[case] labels: &[i64], #[case] query_label: i64) {
        let eval =
            evaluator(&[&[0.0, 0.0], &[1.0, 0.0], &[0.0, 1.0], &[1.0, 1.0]], labels, 3);
        let q = array![0.2, 0.2];
        let acc = eval.local_accuracy(q.view(), query_label).unwrap();
        assert!((0.0..=1.0).contains(&acc));
    }

    /// Held-out image nearest to the two label-0 references and far
    /// from the label-1 one: both retrieved neighbors match.
    #[test]
    fn test_heldout_scenario() {
        let eval = evaluator(&[&[0.0, 0.0], &[1.0, 0.0], &[50.0, 50.0]], &[0, 0, 1], 2);
        let q = array![0.5, 0.1];
        assert_eq!(eval.local_accuracy(q.view(), 0).unwrap(), 1.0);

        let batch = (Array2::from_shape_vec((1, 2), vec![0.5, 0.1]).unwrap(), vec![0i64]);
        let acc = eval.average_accuracy([Ok(batch)]).unwrap();
        assert_eq!(acc, 1.0);
    }

    #[test]
    fn test_absent_label_scores_zero() {
        let eval = evaluator(&[&[0.0], &[1.0], &[2.0]], &[3, 3, 3], 30);
        let batch = (
            Array2::from_shape_vec((2, 1), vec![0.5, 1.5]).unwrap(),
            vec![9i64, 8i64],
        );
        assert_eq!(eval.average_accuracy([Ok(batch)]).unwrap(), 0.0);
    }

    #[test]
    fn test_average_is_arithmetic_mean() {
        // k = 2: query 0 matches both neighbors, query 1 matches one
        let eval = evaluator(&[&[0.0], &[1.0], &[2.0]], &[0, 0, 1], 2);
        let batch = (
            Array2::from_shape_vec((2, 1), vec![0.1, 1.9]).unwrap(),
            vec![0i64, 0i64],
        );
        let acc = eval.average_accuracy([Ok(batch)]).unwrap();
        assert_eq!(acc, (1.0 + 0.5) / 2.0);
    }

    #[test]
    fn test_empty_query_stream_rejected() {
        let eval = evaluator(&[&[0.0]], &[0], 30);
        let err = eval
            .average_accuracy(std::iter::empty::<Result<(Array2<f32>, Vec<i64>)>>())
            .unwrap_err();
        let err = err.downcast::<EvalError>().unwrap();
        assert!(matches!(err, EvalError::EmptyDataset(_)));
    }

    #[test]
    fn test_single_reference_caps_neighbors() {
        let eval = evaluator(&[&[7.0]], &[4], 30);
        let q = array![0.0];
        assert_eq!(eval.local_accuracy(q.view(), 4).unwrap(), 1.0);
        assert_eq!(eval.local_accuracy(q.view(), 5).unwrap(), 0.0);
    }

    /// Querying the reference set against itself retrieves the query's
    /// own embedding first, so the score can only be as good or better
    /// than with the query excluded from its reference set.
    #[test]
    fn test_self_match_never_hurts() {
        let rows: &[&[f32]] = &[&[0.0, 0.0], &[10.0, 0.0], &[0.0, 10.0], &[10.0, 10.0]];
        let labels = &[0i64, 1, 2, 3];
        let with_self = evaluator(rows, labels, 1);

        let mut total_with = 0.0;
        let mut total_without = 0.0;
        for i in 0..rows.len() {
            let q = Array1::from_vec(rows[i].to_vec());
            total_with += with_self.local_accuracy(q.view(), labels[i]).unwrap();

            let rest: Vec<&[f32]> =
                rows.iter().enumerate().filter(|(j, _)| *j != i).map(|(_, r)| *r).collect();
            let rest_labels: Vec<i64> =
                labels.iter().enumerate().filter(|(j, _)| *j != i).map(|(_, &l)| l).collect();
            let without_self = evaluator(&rest, &rest_labels, 1);
            total_without += without_self.local_accuracy(q.view(), labels[i]).unwrap();
        }

        assert!(total_with >= total_without);
        assert_eq!(total_with, rows.len() as f64);
    }
}
