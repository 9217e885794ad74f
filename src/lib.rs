pub mod backbone;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod discriminator;
pub mod error;
pub mod eval;
pub mod index;

pub use config::Opts;
pub use eval::RetrievalEvaluator;
pub use index::EmbeddingIndex;
