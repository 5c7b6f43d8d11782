use clap::Parser;
use mininote::cli::commands::Cli;
use mininote::cli::handlers;

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins; --verbose raises the default from warn to debug
    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();

    if let Err(e) = handlers::dispatch(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
