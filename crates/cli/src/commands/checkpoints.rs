//! Checkpoints command - show what each node has committed

use crate::output::{print_checkpoints, OutputFormat};
use crate::CliResult;
use clap::Args;
use medallion_config::MedallionConfig;
use medallion_processor::state::{self, StorageAdapter};

#[derive(Args, Debug, Clone)]
pub struct CheckpointsCommand {
    /// Only show this node
    #[arg(long, value_name = "NODE")]
    pub node: Option<String>,
}

impl CheckpointsCommand {
    pub async fn execute(&self, config: MedallionConfig, format: OutputFormat) -> CliResult<()> {
        let store = state::open_store(&config.storage).await?;

        let nodes = match &self.node {
            Some(node) => vec![node.clone()],
            None => store.checkpointed_nodes().await?,
        };

        let mut checkpoints = Vec::with_capacity(nodes.len());
        for node in &nodes {
            if let Some(checkpoint) = store.load_checkpoint(node).await? {
                checkpoints.push(checkpoint);
            }
        }

        print_checkpoints(&checkpoints, format)
    }
}
