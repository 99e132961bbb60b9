use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "cvforge")]
#[command(about = "CV enhancement backend", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full runtime: document store, queue broker, worker pools
    Serve,

    /// One-shot retention sweep, then exit
    Prune,
}
