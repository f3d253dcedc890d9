//! ReelCast - cast local files and resolved streams to a Chromecast
//!
//! # Usage
//!
//! ```bash
//! reelcast play movie.mkv --device "Living Room TV"
//! reelcast play --url https://cdn.example/v.mp4 --title "Clip" --duration 600
//! reelcast devices --json
//! ```

use clap::Parser;
use tracing_subscriber::EnvFilter;

use reelcast::cli::{Cli, Command, ExitCode, Output};
use reelcast::commands;
use reelcast::config::Config;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    run_cli(cli).await.into()
}

/// Log to stderr; RUST_LOG overrides the -v flags
fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run CLI command and return exit code
async fn run_cli(cli: Cli) -> ExitCode {
    let output = Output::new(&cli);
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let device = cli.device.as_deref();

    match cli.command {
        Command::Play(cmd) => commands::play_cmd(cmd, &config, device, &output).await,
        Command::Serve(cmd) => commands::serve_cmd(cmd, &config, &output).await,
        Command::Encoder(cmd) => commands::encoder_cmd(cmd, &config, &output).await,
        Command::Probe(cmd) => commands::probe_cmd(cmd, &config, &output).await,
        Command::Devices(cmd) => commands::devices_cmd(cmd, &config, &output).await,
    }
}
