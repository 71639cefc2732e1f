mod cli;
mod config;
mod error;
mod models;
mod storage;
mod store;
mod sync;

use clap::Parser;
use colored::*;

use cli::Cli;
use sync::report::EXIT_FATAL;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();

    let code = match cli::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            log::debug!("Fatal error: {:?}", e);
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            EXIT_FATAL
        }
    };

    std::process::exit(code);
}
