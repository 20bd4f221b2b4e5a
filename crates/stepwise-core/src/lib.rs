pub mod config;
pub mod error;

pub use config::StepwiseConfig;
pub use error::{Result, StepwiseError};
