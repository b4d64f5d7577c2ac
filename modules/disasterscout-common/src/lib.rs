pub mod error;
pub mod types;

pub use error::{IngestError, IngestResult};
pub use types::*;
