pub mod confirmer;
pub mod error;
pub mod extract;
pub mod html;
pub mod keywords;
pub mod link_check;
pub mod oracle;
pub mod persister;
mod readability;
pub mod retriever;
pub mod scout;
pub mod sentences;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use error::{FetchError, LinkScoutError, OracleError, Result, StoreError};
pub use scout::{AnalysisReport, LinkScout, PipelineConfig};
