pub mod cli;
pub mod config;
pub mod context;
pub mod enrich;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod linkage;
pub mod llm;
pub mod mint;
pub mod promotion;
pub mod rollback;
pub mod source;
pub mod stages;
pub mod text;
pub mod verify;
pub mod warehouse;

pub use config::Config;
pub use context::{PipelineContext, RunOptions};
pub use error::{Error, Result};
pub use warehouse::Warehouse;
