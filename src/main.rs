mod cli;
mod config;
mod error;
mod llm;
mod logger;
mod message;
mod room;
mod session;
mod store;
mod stream;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config();
    logger::init(config.debug);
    log::debug!("Using API at {}", config.api_addr);
    cli::run_cli(config)
}
