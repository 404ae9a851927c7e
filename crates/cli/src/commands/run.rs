//! Run command - tick the configured pipeline until interrupted

use crate::output::{print_statuses, OutputFormat};
use crate::{CliError, CliResult};
use clap::Args;
use colored::Colorize;
use medallion_config::MedallionConfig;
use medallion_processor::pipeline::{IncrementalExecutor, NodeState, PipelineBuilder};
use medallion_processor::source::SyntheticEventSource;
use medallion_processor::state;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Args, Debug, Clone)]
pub struct RunCommand {
    /// Stop after this many ticks instead of waiting for Ctrl-C
    #[arg(long, value_name = "N")]
    pub ticks: Option<u64>,

    /// Generate events as fast as possible instead of at the configured rate
    #[arg(long)]
    pub no_throttle: bool,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    pub metrics: bool,
}

impl RunCommand {
    pub async fn execute(&self, mut config: MedallionConfig, format: OutputFormat) -> CliResult<()> {
        if self.no_throttle {
            config.source.throttle = false;
        }
        config.validate()?;

        let graph = PipelineBuilder::new(config.pipeline.clone())
            .with_engine_config(config.engine.clone())
            .build()?;
        let store = Arc::new(state::open_store(&config.storage).await?);
        let source = Arc::new(SyntheticEventSource::open(config.source.clone(), store.as_ref()).await?);

        info!(
            pipeline = %config.pipeline.name,
            nodes = graph.len(),
            backend = ?config.storage.backend,
            "Starting pipeline"
        );
        let mut executor = IncrementalExecutor::open(graph, source, store, config.engine).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, finishing the current tick");
                    let _ = shutdown_tx.send(true);
                }
                Err(e) => {
                    warn!(error = %e, "Unable to listen for Ctrl-C");
                    // Dropping the sender would stop the run
                    let _keep_alive = shutdown_tx;
                    std::future::pending::<()>().await
                }
            }
        });

        let ticks = executor.run(shutdown_rx, self.ticks).await;
        println!("{} {} ticks", "Completed".green().bold(), ticks);

        let statuses = executor.statuses();
        print_statuses(&statuses, format)?;

        if self.metrics && config.observability.metrics_enabled {
            let text = executor
                .metrics()
                .encode()
                .map_err(|e| CliError::Encoding(e.to_string()))?;
            println!("\n{text}");
        }

        let failed: Vec<String> = statuses
            .into_iter()
            .filter(|s| s.state == NodeState::Failed)
            .map(|s| s.name)
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(CliError::NodesFailed(failed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medallion_config::StorageBackendKind;

    fn quick_config() -> MedallionConfig {
        let mut config = MedallionConfig::clickstream().unwrap();
        config.engine.tick_interval_ms = 1;
        config.engine.max_batch_rows = 200;
        config
    }

    #[tokio::test]
    async fn test_bounded_run_succeeds() {
        let command = RunCommand {
            ticks: Some(3),
            no_throttle: true,
            metrics: true,
        };
        command
            .execute(quick_config(), OutputFormat::Json)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_then_inspect_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = quick_config();
        config.storage.backend = StorageBackendKind::Sled;
        config.storage.path = dir.path().join("state");

        let command = RunCommand {
            ticks: Some(2),
            no_throttle: true,
            metrics: false,
        };
        command.execute(config.clone(), OutputFormat::Table).await.unwrap();

        let store = state::open_store(&config.storage).await.unwrap();
        let nodes = medallion_processor::StorageAdapter::checkpointed_nodes(&store)
            .await
            .unwrap();
        assert!(nodes.contains(&"bronze_events".to_string()));
        drop(store);

        crate::commands::CheckpointsCommand { node: None }
            .execute(config, OutputFormat::Json)
            .await
            .unwrap();
    }
}
