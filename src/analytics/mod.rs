//! Descriptive business metrics over Silver and Gold, consumed only for
//! reporting.
//!
//! Every computation returns [`AnalysisOutcome`] instead of throwing: a
//! fatal data problem is `Failed`, a recoverable gap (a department with too
//! few quarters, a missing comparison class) degrades to `Partial` with the
//! warnings spelled out.

pub mod correlation;
pub mod decote;
pub mod growth;
pub mod segments;

use polars::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::gold::GOLD_COMPLETE_KEY;
use crate::store::LakeStore;
use crate::transform::parquet;

pub use correlation::{price_energy_correlation, PriceEnergyCorrelation};
pub use decote::{decote_verte, join_transactions_on_commune, DecoteVerte};
pub use growth::{quarterly_growth, QuarterlyGrowth};
pub use segments::{price_segments, PriceSegments};

/// Typed replacement for status-flag dictionaries: success, recoverable
/// partial failure, or fatal error.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome<T> {
    Complete { result: T },
    Partial { result: T, warnings: Vec<String> },
    Failed { reason: String },
}

impl<T> AnalysisOutcome<T> {
    /// Collapse into Complete or Partial depending on accumulated warnings.
    pub fn from_parts(result: T, warnings: Vec<String>) -> Self {
        if warnings.is_empty() {
            AnalysisOutcome::Complete { result }
        } else {
            AnalysisOutcome::Partial { result, warnings }
        }
    }

    pub fn result(&self) -> Option<&T> {
        match self {
            AnalysisOutcome::Complete { result } => Some(result),
            AnalysisOutcome::Partial { result, .. } => Some(result),
            AnalysisOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, AnalysisOutcome::Failed { .. })
    }
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (ddof = 1).
pub(crate) fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

pub(crate) fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let mx = mean(xs)?;
    let my = mean(ys)?;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some(cov / (vx * vy).sqrt())
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Numeric column as f64 values, whatever its physical type.
pub(crate) fn column_f64(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = df.column(name)?.cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().collect())
}

pub(crate) fn column_str(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    Ok(df
        .column(name)?
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect())
}

fn report<T: Serialize>(name: &str, outcome: &AnalysisOutcome<T>) -> Result<()> {
    match outcome {
        AnalysisOutcome::Failed { reason } => {
            warn!(analysis = name, reason = reason.as_str(), "analysis failed")
        }
        AnalysisOutcome::Partial { warnings, .. } => {
            warn!(analysis = name, warnings = warnings.len(), "analysis partial")
        }
        AnalysisOutcome::Complete { .. } => info!(analysis = name, "analysis complete"),
    }
    println!("--- {name} ---");
    println!("{}", serde_json::to_string_pretty(outcome)?);
    Ok(())
}

/// Run the four reporting computations against Silver and Gold.
pub async fn run_analytics(store: &LakeStore, config: &PipelineConfig) -> Result<()> {
    let silver = &config.buckets.silver;
    let dvf = parquet::read_dataset(store, silver, "dvf")
        .await?
        .ok_or_else(|| crate::error::PipelineError::data("silver DVF dataset is empty"))?;
    let dpe = parquet::read_dataset(store, silver, "dpe")
        .await?
        .ok_or_else(|| crate::error::PipelineError::data("silver DPE dataset is empty"))?;
    let gold_bytes = store.get_object(&config.buckets.gold, GOLD_COMPLETE_KEY).await?;
    let gold = parquet::decode_parquet(gold_bytes)?;
    info!(rows = gold.height(), "gold flat file loaded");

    report("decote_verte", &decote_verte(&dvf, &dpe))?;
    report("price_segments", &price_segments(&gold))?;
    report("price_energy_correlation", &price_energy_correlation(&gold))?;
    report("quarterly_growth", &quarterly_growth(&gold))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pearson_detects_perfect_correlation() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let ys = [2.0, 4.0, 6.0, 8.0];
        let r = pearson(&xs, &ys).unwrap();
        assert!((r - 1.0).abs() < 1e-12);

        let inv: Vec<f64> = ys.iter().map(|v| -v).collect();
        let r = pearson(&xs, &inv).unwrap();
        assert!((r + 1.0).abs() < 1e-12);
    }

    #[test]
    fn pearson_rejects_degenerate_input() {
        assert!(pearson(&[1.0], &[2.0]).is_none());
        assert!(pearson(&[1.0, 1.0], &[2.0, 3.0]).is_none());
        assert!(pearson(&[1.0, 2.0], &[2.0]).is_none());
    }

    #[test]
    fn std_dev_is_sample_based() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        // population std is 2.0; sample std slightly larger
        let s = std_dev(&values).unwrap();
        assert!((s - 2.138089935).abs() < 1e-6);
        assert!(std_dev(&[1.0]).is_none());
    }

    #[test]
    fn outcome_partitions_on_warnings() {
        let complete = AnalysisOutcome::from_parts(1, vec![]);
        assert!(matches!(complete, AnalysisOutcome::Complete { .. }));
        let partial = AnalysisOutcome::from_parts(1, vec!["gap".to_string()]);
        assert!(matches!(partial, AnalysisOutcome::Partial { .. }));
        assert!(!partial.is_failed());
        assert_eq!(partial.result(), Some(&1));
    }
}
