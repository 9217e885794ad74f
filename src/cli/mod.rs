mod evaluate;
mod query;

pub use evaluate::*;
pub use query::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> anyhow::Result<()>;
}
