use std::path::PathBuf;

use thiserror::Error;

/// Checkpoint could not be turned into a network ready for inference.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("cannot read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: tch::TchError,
    },
    #[error("checkpoint {path} is missing weight tensor `{name}`")]
    MissingTensor { path: PathBuf, name: String },
    #[error(
        "checkpoint {path}: tensor `{name}` has shape {found:?}, selected backbone expects {expected:?}"
    )]
    ShapeMismatch { path: PathBuf, name: String, expected: Vec<i64>, found: Vec<i64> },
    #[error("checkpoint {path} is missing metadata scalar `{name}`")]
    MissingMeta { path: PathBuf, name: String },
}

/// Errors raised while building or querying the retrieval evaluator.
///
/// All of these are fatal: evaluation has no partial-result mode.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("{0} contains no images")]
    EmptyDataset(String),
    #[error("embedding has dimension {found}, index expects {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("got {labels} reference labels for {rows} reference embeddings")]
    LabelCount { labels: usize, rows: usize },
}
