use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::backbone::{Backbone, EMBEDDING_DIM};
use crate::cli::*;

#[derive(Parser, Debug, Clone)]
pub struct ModelOptions {
    /// Trained backbone variant
    #[arg(short, long, value_enum, default_value_t = Backbone::Resnet34)]
    pub model: Backbone,
    /// Batch size for loading images
    #[arg(short, long, value_name = "SIZE", default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..))]
    pub batch_size: u32,
    /// Embedding vector length
    #[arg(long, value_name = "DIM", default_value_t = EMBEDDING_DIM, value_parser = clap::value_parser!(i64).range(1..))]
    pub embedding_dim: i64,
    /// Checkpoint file, defaults to model_state_<MODEL>.safetensors
    #[arg(short, long, value_name = "FILE")]
    pub checkpoint: Option<PathBuf>,
}

impl ModelOptions {
    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.model.default_checkpoint()))
    }
}

#[derive(Parser, Debug, Clone)]
pub struct DataOptions {
    /// List file of reference (training) images
    #[arg(long, value_name = "FILE", default_value = "train_list.txt")]
    pub train_list: PathBuf,
    /// List file of held-out images
    #[arg(long, value_name = "FILE", default_value = "val_list.txt")]
    pub val_list: PathBuf,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imrank", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// Compute training and test retrieval accuracy for a trained model
    Evaluate(EvaluateCommand),
    /// Inspect ranked retrieval results for one class
    Query(QueryCommand),
}
