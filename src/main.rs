mod cli;
mod config;
mod engine;
mod errors;
mod logging;
mod model;
mod notify;
mod orchestrator;
mod storage;
mod text_summary;

use clap::Parser;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    let is_silent = args.silent;

    let code = match cli::run(args).await {
        Ok(code) => code,
        Err(e) => {
            if is_silent {
                println!("{}", e);
            } else {
                eprintln!("Error: {e:#}");
            }
            model::exit_code::GENERAL
        }
    };
    std::process::exit(code);
}
