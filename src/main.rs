use clap::Parser;
use ix_rdd::storage::MemoryStore;
use ix_rdd::tool::{Cli, Fixture, IndexTool, STATUS_JOB_FAILED, STATUS_SETUP, STATUS_SUCCESS};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = cli.into_config()?;

    info!("Starting ix-rdd: RDD-based secondary index builder");

    // 内存存储：表结构与数据来自 fixture
    let store = Arc::new(MemoryStore::new());
    let Some(path) = &cli.fixture else {
        error!("No storage backend configured, pass --fixture <dataset.json>");
        std::process::exit(STATUS_SETUP);
    };
    let fixture = Fixture::load(path)?;
    fixture.install(store.as_ref())?;

    let tool = IndexTool::new(store, Arc::new(RwLock::new(fixture.catalog)));
    let mut status = tool.run(&config).await;

    // 存储随进程存在，后台作业也要等到结束
    if !config.run_foreground && status == STATUS_SUCCESS {
        tokio::select! {
            finished = tool.wait() => {
                status = finished.unwrap_or(status);
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, abandoning background job");
                status = STATUS_JOB_FAILED;
            }
        }
    }

    if let Some(report) = tool.report() {
        println!("{}", report);
    }
    info!("Exiting with status {}", status);
    std::process::exit(status);
}
