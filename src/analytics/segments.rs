//! Categorical segmentation of departments by price level.

use std::collections::BTreeMap;

use polars::prelude::*;
use serde::Serialize;

use crate::analytics::{column_f64, column_str, mean, round2, std_dev, AnalysisOutcome};
use crate::error::Result;
use crate::transform::require_columns;

#[derive(Debug, Serialize)]
pub struct PriceSegments {
    pub prix_m2_moyen_global: f64,
    pub prix_m2_std_global: f64,
    pub mean_by_departement: BTreeMap<String, f64>,
    /// `luxe` / `haut_de_gamme` / `moyen` / `accessible` per department.
    pub segments: BTreeMap<String, String>,
}

/// Segment label relative to the global price distribution.
fn segment_label(dept_mean: f64, global_mean: f64, global_std: f64) -> &'static str {
    if dept_mean > global_mean + global_std {
        "luxe"
    } else if dept_mean > global_mean {
        "haut_de_gamme"
    } else if dept_mean > global_mean - global_std {
        "moyen"
    } else {
        "accessible"
    }
}

fn compute(gold: &DataFrame) -> Result<AnalysisOutcome<PriceSegments>> {
    require_columns(gold, &["departement", "prix_m2_median"], "gold")?;

    let departements = column_str(gold, "departement")?;
    let medians = column_f64(gold, "prix_m2_median")?;

    let mut all_prices = Vec::new();
    let mut per_dept: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (dept, median) in departements.iter().zip(&medians) {
        if let (Some(dept), Some(median)) = (dept, median) {
            all_prices.push(*median);
            per_dept.entry(dept.clone()).or_default().push(*median);
        }
    }

    let global_mean = match mean(&all_prices) {
        Some(m) => m,
        None => {
            return Ok(AnalysisOutcome::Failed {
                reason: "gold dataset holds no priced rows".to_string(),
            })
        }
    };
    let mut warnings = Vec::new();
    let global_std = match std_dev(&all_prices) {
        Some(s) => s,
        None => {
            warnings.push("fewer than two priced rows, spread treated as zero".to_string());
            0.0
        }
    };

    let mut mean_by_departement = BTreeMap::new();
    let mut segments = BTreeMap::new();
    for (dept, prices) in &per_dept {
        if let Some(dept_mean) = mean(prices) {
            mean_by_departement.insert(dept.clone(), round2(dept_mean));
            segments.insert(
                dept.clone(),
                segment_label(dept_mean, global_mean, global_std).to_string(),
            );
        }
    }

    Ok(AnalysisOutcome::from_parts(
        PriceSegments {
            prix_m2_moyen_global: round2(global_mean),
            prix_m2_std_global: round2(global_std),
            mean_by_departement,
            segments,
        },
        warnings,
    ))
}

pub fn price_segments(gold: &DataFrame) -> AnalysisOutcome<PriceSegments> {
    match compute(gold) {
        Ok(outcome) => outcome,
        Err(e) => AnalysisOutcome::Failed {
            reason: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_follow_the_band_boundaries() {
        // mean 100, std 10
        assert_eq!(segment_label(115.0, 100.0, 10.0), "luxe");
        assert_eq!(segment_label(105.0, 100.0, 10.0), "haut_de_gamme");
        assert_eq!(segment_label(95.0, 100.0, 10.0), "moyen");
        assert_eq!(segment_label(85.0, 100.0, 10.0), "accessible");
    }

    #[test]
    fn departments_are_segmented_against_the_global_distribution() {
        let gold = df!(
            "departement" => ["92", "92", "59", "59", "34", "34"],
            "prix_m2_median" => [6500.0, 6700.0, 1900.0, 2100.0, 2900.0, 3100.0],
        )
        .unwrap();
        let outcome = price_segments(&gold);
        let result = outcome.result().expect("segments should compute");
        assert_eq!(result.segments["92"], "luxe");
        assert_eq!(result.segments["59"], "moyen");
        assert_eq!(result.segments["34"], "moyen");
        assert_eq!(result.mean_by_departement["92"], 6600.0);
    }

    #[test]
    fn empty_gold_fails() {
        let gold = df!(
            "departement" => Vec::<String>::new(),
            "prix_m2_median" => Vec::<f64>::new(),
        )
        .unwrap();
        assert!(price_segments(&gold).is_failed());
    }
}
