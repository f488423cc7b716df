//! Bronze/Silver/Gold ETL pipeline for French housing transactions (DVF)
//! and energy-performance diagnostics (DPE).
//!
//! Each stage is a manually-invoked command sharing only the object-store
//! layout: Bronze holds verbatim raw objects, Silver holds typed and
//! partitioned Parquet, Gold holds the per-(department, quarter) market
//! indicators consumed by the dashboard.

pub mod analytics;
pub mod config;
pub mod error;
pub mod gold;
pub mod ingest;
pub mod logging;
pub mod store;
pub mod transform;
pub mod verify;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
