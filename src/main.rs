use anyhow::Context;
use capposix::interface::StdioTerminal;
use capposix::safeposix::config::Config;
use capposix::safeposix::loader::ImageLoader;
use capposix::tools::register_builtins;
use clap::Parser;
use env_logger::Env;
use std::path::PathBuf;

/// Boots a process tree from a JSON configuration and runs init to
/// completion on the host terminal.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Startup configuration (init program and filesystem table)
    #[arg(short, long)]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let loader = ImageLoader::new();
    register_builtins(&loader);

    let system = config
        .boot(loader, StdioTerminal::new())
        .context("booting init")?;
    let status = system.wait_for_init();
    system.finalize();
    log::info!("init exited with status {}", status);
    std::process::exit(status);
}
