//! Bronze-tier ingestion: the paged DPE API and local DVF files.

pub mod dpe;
pub mod dvf;
pub mod rate_limiter;

pub use dpe::{DpeIngestor, IngestReport};
pub use dvf::{DvfIngestor, DvfReport};
