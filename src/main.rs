mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use cvforge::config::Config;
use cvforge::observability;
use cvforge::store::CoreStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    observability::init_tracing();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Serve => cvforge::runtime::run(config).await?,
        Commands::Prune => {
            let store = CoreStore::open(config.runtime.data_dir.join("docs"))?;
            let stats = store.prune_expired(&config.retention)?;
            println!(
                "pruned {} jobs, {} companions, {} deliveries",
                stats.jobs_pruned, stats.companions_pruned, stats.deliveries_pruned
            );
        }
    }

    Ok(())
}
