pub mod args;

use clap::Parser;

pub use args::{Arguments, QualityEncoding};

pub fn parse() -> Arguments {
    Arguments::parse()
}
