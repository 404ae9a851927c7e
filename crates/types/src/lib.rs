//! Core data model for the medallion streaming engine
//!
//! Every crate in the workspace exchanges [`Record`]s: an ordered set of
//! named [`Value`]s plus the event time used for windowing.

pub mod errors;
pub mod record;
pub mod value;

pub use errors::{RecordError, Result};
pub use record::Record;
pub use value::Value;
