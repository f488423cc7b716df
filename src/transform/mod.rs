//! Bronze→Silver transforms: typing, filtering and partitioned Parquet
//! output for both datasets.

pub mod parquet;
pub mod silver_dpe;
pub mod silver_dvf;

use polars::prelude::DataFrame;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::store::LakeStore;

/// Fail fast with every missing column named, not just the first.
pub fn require_columns<S: AsRef<str>>(df: &DataFrame, required: &[S], context: &str) -> Result<()> {
    let present = df.get_column_names();
    let missing: Vec<String> = required
        .iter()
        .map(|c| c.as_ref())
        .filter(|c| !present.iter().any(|p| *p == *c))
        .map(|c| c.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::missing_columns(context, missing))
    }
}

/// Rebuild both Silver datasets from Bronze.
pub async fn run_silver(store: &LakeStore, config: &PipelineConfig) -> Result<()> {
    info!("=== BRONZE -> SILVER: DVF ===");
    silver_dvf::transform_dvf(store, config).await?;
    info!("=== BRONZE -> SILVER: DPE ===");
    silver_dpe::transform_dpe(store, config).await?;
    Ok(())
}
