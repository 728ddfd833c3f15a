pub mod catalog;
pub mod config;
pub mod duck;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod pipeline;
pub mod process;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
