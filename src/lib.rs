pub mod config;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod massif;
pub mod plot;
pub mod report;
pub mod sampling;
pub mod scheduler;
pub mod trial;

pub use error::{HarnessError, Result};
