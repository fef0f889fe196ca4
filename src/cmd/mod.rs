//! `profmerge` subcommands.

mod inspect_cmd;
mod report_cmd;

pub use inspect_cmd::*;
pub use report_cmd::*;
