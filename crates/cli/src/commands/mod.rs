//! CLI command implementations

pub mod checkpoints;
pub mod run;
pub mod validate;

pub use checkpoints::CheckpointsCommand;
pub use run::RunCommand;
pub use validate::ValidateCommand;
