use std::sync::Arc;

use clap::Parser;
use tokio::signal::ctrl_c;
use tracing_subscriber::EnvFilter;

use crate::{
    batch::BatchRunner, cli::Cli, config::Config, invoker::HttpInvoker, record::InvocationLog,
    scheduler::Scheduler,
};

mod batch;
mod cli;
mod config;
mod invoker;
mod record;
mod scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).await?;

    let invoker = HttpInvoker::new(config.target.timeout())?;
    let log = InvocationLog::new(&config.log.path);

    tracing::info!(
        "target {} ({} byte payload), {}..={} invocations every {:?}, log {}",
        config.target.url,
        config.target.payload.len(),
        config.invocation.min,
        config.invocation.max,
        config.period(),
        log.path().display()
    );
    let runner = BatchRunner::new(
        config.target.clone(),
        config.invocation,
        Arc::new(invoker),
        Arc::new(log),
    );

    let scheduler = Scheduler::new(Arc::new(runner), config.period(), config.overlap).spawn();

    ctrl_c().await?;

    tracing::info!(
        "got ctrl_c, waiting up to {:?} for running batches (ctrl_c again to abort)",
        config.grace()
    );

    let force = async {
        ctrl_c().await.ok();
    };
    let stats = scheduler.shutdown(config.grace(), force).await?;

    tracing::info!(
        "{} tick(s): {} ok, {} failed, {} skipped, {} aborted",
        stats.ticks,
        stats.succeeded,
        stats.failed,
        stats.skipped,
        stats.aborted
    );

    Ok(())
}
