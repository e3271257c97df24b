pub mod config;
pub mod error;
pub mod fetch;
pub mod period;
pub mod pipeline;
pub mod process;
pub mod remote;
pub mod retry;
pub mod scheduler;
pub mod schema;
pub mod variant;

pub use config::RunConfig;
pub use error::ExtractError;
pub use pipeline::{Extraction, ExtractionPipeline, ExtractionSummary};
pub use period::ReferencePeriod;
