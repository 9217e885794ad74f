use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use imrank::cli::SubCommandExtend;
use imrank::config::{Opts, SubCommand};

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();
    match &opts.subcmd {
        SubCommand::Evaluate(cmd) => cmd.run(&opts),
        SubCommand::Query(cmd) => cmd.run(&opts),
    }
}
