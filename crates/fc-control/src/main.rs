//! flowcast daemon
//!
//! Boots an engine with the loopback filter factory and serves the control
//! socket until a `stop` action arrives. Exits 0 on clean shutdown and
//! non-zero when the socket cannot be bound.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use fc_control::Controller;
use fc_engine::{Engine, LoopbackFactory, WorkersPool};

#[derive(Parser, Debug)]
#[command(name = "flowcast", about = "Live media streaming engine daemon")]
struct Cli {
    /// TCP port for the control socket
    #[arg(short, long)]
    port: u16,

    /// Address to bind the control socket on
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Worker threads (0 picks a size from the hardware)
    #[arg(short, long, default_value_t = 0)]
    workers: usize,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let workers = if cli.workers == 0 { WorkersPool::default_threads() } else { cli.workers };
    log::info!("starting engine with {workers} workers");
    let engine = Arc::new(Engine::new(workers, Box::new(LoopbackFactory::default())));

    let controller = Controller::bind(engine, (cli.bind.as_str(), cli.port))
        .with_context(|| format!("failed to bind control socket on {}:{}", cli.bind, cli.port))?;

    controller.run().context("control loop failed")?;
    log::info!("shutdown complete");
    Ok(())
}
