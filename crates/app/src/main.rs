use clap::Parser;
use vision_assist::cli::{self, Cli};

fn main() {
    if let Err(err) = cli::handle(Cli::parse()) {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}
