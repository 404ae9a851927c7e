//! Validate command - build the pipeline graph without running it

use crate::CliResult;
use clap::Args;
use colored::Colorize;
use medallion_config::MedallionConfig;
use medallion_processor::pipeline::PipelineBuilder;

#[derive(Args, Debug, Clone)]
pub struct ValidateCommand {
    /// Print the nodes of each execution level
    #[arg(long)]
    pub levels: bool,
}

impl ValidateCommand {
    pub fn execute(&self, config: MedallionConfig) -> CliResult<()> {
        config.validate()?;
        let graph = PipelineBuilder::new(config.pipeline.clone())
            .with_engine_config(config.engine.clone())
            .build()?;

        println!(
            "{} pipeline '{}' with {} nodes",
            "Valid".green().bold(),
            config.pipeline.name,
            graph.len()
        );

        if self.levels {
            for (depth, level) in graph.levels().iter().enumerate() {
                println!("  {} {}", format!("level {depth}:").cyan(), level.join(", "));
            }
        }
        Ok(())
    }
}
