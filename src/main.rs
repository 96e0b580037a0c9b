//! `revtunnel` — reverse TCP tunnel CLI.
//!
//! With no subcommand, loads `Config` from the environment and runs the
//! resolved role (Inside or Outside) until a termination signal arrives.
//! `revtunnel probe` is a standalone diagnostic that prints the backend
//! ports the Inside role would currently advertise.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use revtunnel::config::Config;
use revtunnel::probe::{self, SsPortLister};
use tokio::sync::Notify;

#[derive(Parser)]
#[command(name = "revtunnel", version, about = "Reverse TCP tunnel")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the backend ports an Inside-mode probe would currently find.
    Probe,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Runtime::new()?;
    match cli.command {
        Some(Command::Probe) => runtime.block_on(run_probe()),
        None => runtime.block_on(run_tunnel()),
    }
}

async fn run_probe() -> Result<()> {
    let config = Config::load()?;
    let process_name = config.probe_process_name.clone();
    let bridge_port = config.bridge_port;
    let sync_port = config.sync_port;
    let ports = tokio::task::spawn_blocking(move || {
        probe::probe(&SsPortLister, &process_name, bridge_port, sync_port)
    })
    .await?;

    let mut sorted: Vec<u16> = ports.into_iter().collect();
    sorted.sort_unstable();
    println!("{sorted:?}");
    Ok(())
}

async fn run_tunnel() -> Result<()> {
    let config = Config::load()?;
    let role = config.role;

    let shutdown = Arc::new(Notify::new());
    install_signal_handler(Arc::clone(&shutdown))?;

    log::info!("starting in {role:?} mode");
    match role {
        revtunnel::Role::Inside => revtunnel::inside::run(config, shutdown).await,
        revtunnel::Role::Outside => revtunnel::outside::run(config, shutdown).await,
    }
}

/// Wire `SIGINT`/`SIGTERM`/`SIGHUP` to `shutdown.notify_waiters()` so every
/// concurrently running accept/worker loop observes the same signal.
///
/// Follows the teacher's `signal_hook::flag::register` + polled `AtomicBool`
/// pattern rather than a callback-based handler, since the flag is what the
/// teacher's headless run loop actually exercises.
fn install_signal_handler(shutdown: Arc<Notify>) -> Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;

    let received = Arc::new(std::sync::atomic::AtomicBool::new(false));
    flag::register(SIGINT, Arc::clone(&received))?;
    flag::register(SIGTERM, Arc::clone(&received))?;
    flag::register(SIGHUP, Arc::clone(&received))?;

    tokio::spawn(async move {
        loop {
            if received.load(std::sync::atomic::Ordering::Relaxed) {
                log::info!("received shutdown signal");
                shutdown.notify_waiters();
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    });
    Ok(())
}
