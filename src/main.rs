mod cmd;

use anyhow::Result;
use asterai_cli::cli::{Cli, Command};
use clap::Parser;
use tracing::Level;

use crate::cmd::Context;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    match cli.command {
        Command::Config(config_cmd) => cmd::config::run(config_cmd),
        Command::Auth(auth) => cmd::auth::run(&Context::load(&cli.global)?, auth),
        Command::Env(env) => cmd::env::run(&Context::load(&cli.global)?, env),
        Command::Component(component) => {
            cmd::component::run(&Context::load(&cli.global)?, component)
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
