use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::info;
use serde::Serialize;

use crate::backbone::EmbeddingExtractor;
use crate::cli::SubCommandExtend;
use crate::config::{DataOptions, ModelOptions, Opts};
use crate::dataset::ImageList;
use crate::eval::{DEFAULT_NEIGHBORS, RetrievalEvaluator};

#[derive(Parser, Debug, Clone)]
pub struct EvaluateCommand {
    #[command(flatten)]
    pub model: ModelOptions,
    #[command(flatten)]
    pub data: DataOptions,
    /// Neighbors retrieved per query image
    #[arg(short = 'k', long, value_name = "K", default_value_t = DEFAULT_NEIGHBORS as u32, value_parser = clap::value_parser!(u32).range(1..))]
    pub neighbors: u32,
    /// Output format
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for EvaluateCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let checkpoint = self.model.checkpoint_path();
        info!("loading trained {} model from {}", self.model.model, checkpoint.display());
        let (extractor, meta) =
            EmbeddingExtractor::load(self.model.model, &checkpoint, self.model.embedding_dim)?;

        info!("loading image lists");
        let train_set = ImageList::open(&self.data.train_list)?;
        let val_set = ImageList::open(&self.data.val_list)?;
        let batch_size = self.model.batch_size as usize;

        let embeddings = extractor.embed_dataset(&train_set, batch_size)?;
        let evaluator =
            RetrievalEvaluator::new(embeddings, train_set.labels(), self.neighbors as usize)?;

        info!("calculating training accuracy");
        let train_accuracy = split_accuracy(&evaluator, &extractor, &train_set, batch_size)?;
        info!("calculating test accuracy");
        let test_accuracy = split_accuracy(&evaluator, &extractor, &val_set, batch_size)?;

        let report = Report {
            model: self.model.model.to_string(),
            epoch: meta.epoch + 1,
            best_loss: meta.best_loss,
            train_accuracy,
            test_accuracy,
        };
        print_report(&report, self)
    }
}

/// Embeds every image of `list` and averages its retrieval accuracy
/// against the evaluator's reference index.
fn split_accuracy(
    evaluator: &RetrievalEvaluator,
    extractor: &EmbeddingExtractor,
    list: &ImageList,
    batch_size: usize,
) -> Result<f64> {
    let batches = list.batches(batch_size).map(|batch| {
        let batch = batch?;
        Ok((extractor.embed_batch(&batch.images)?, batch.labels))
    });
    evaluator.average_accuracy(batches)
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub model: String,
    pub epoch: i64,
    pub best_loss: f64,
    pub train_accuracy: f64,
    pub test_accuracy: f64,
}

fn print_report(report: &Report, opts: &EvaluateCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?)
        }
        OutputFormat::Table => {
            println!(
                "Train at [epoch: {}] loss: {:.3}, accuracy: {:.5}",
                report.epoch, report.best_loss, report.train_accuracy
            );
            println!("Test at [epoch: {}] accuracy: {:.5}", report.epoch, report.test_accuracy);
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}
