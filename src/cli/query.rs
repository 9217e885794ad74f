use anyhow::{Result, bail};
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::{DataOptions, ModelOptions, Opts};

/// Ad-hoc inspection mode: sample one held-out image of the given
/// class and show its ranked retrieval results.
///
/// Declared but not implemented; the output format and the sampling
/// policy are still undecided.
#[derive(Parser, Debug, Clone)]
pub struct QueryCommand {
    #[command(flatten)]
    pub model: ModelOptions,
    #[command(flatten)]
    pub data: DataOptions,
    /// Class label to sample a held-out image from
    pub label: i64,
}

impl SubCommandExtend for QueryCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        bail!("query mode is not implemented")
    }
}
