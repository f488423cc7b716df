//! Quarter-over-quarter growth of the median price per m².

use std::collections::BTreeMap;

use polars::prelude::*;
use serde::Serialize;

use crate::analytics::{column_f64, column_str, mean, round2, std_dev, AnalysisOutcome};
use crate::error::Result;
use crate::transform::require_columns;

#[derive(Debug, Serialize)]
pub struct QuarterGrowth {
    pub trimestre: String,
    pub prix_m2_median: f64,
    /// Percent change against the previous quarter; absent for the first.
    pub growth_pct: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct DeptGrowth {
    pub quarters: Vec<QuarterGrowth>,
    pub mean_growth_pct: Option<f64>,
    /// Standard deviation of the quarterly growth rates.
    pub volatility: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct QuarterlyGrowth {
    pub per_departement: BTreeMap<String, DeptGrowth>,
}

fn compute(gold: &DataFrame) -> Result<AnalysisOutcome<QuarterlyGrowth>> {
    require_columns(gold, &["departement", "trimestre", "prix_m2_median"], "gold")?;

    // quarter labels sort chronologically as plain strings
    let sorted = gold.sort(["departement", "trimestre"], SortMultipleOptions::default())?;
    let departements = column_str(&sorted, "departement")?;
    let trimestres = column_str(&sorted, "trimestre")?;
    let medians = column_f64(&sorted, "prix_m2_median")?;

    let mut per_dept: BTreeMap<String, Vec<(String, f64)>> = BTreeMap::new();
    for i in 0..sorted.height() {
        if let (Some(dept), Some(quarter), Some(median)) =
            (&departements[i], &trimestres[i], medians[i])
        {
            per_dept
                .entry(dept.clone())
                .or_default()
                .push((quarter.clone(), median));
        }
    }

    if per_dept.is_empty() {
        return Ok(AnalysisOutcome::Failed {
            reason: "gold dataset holds no priced quarters".to_string(),
        });
    }

    let mut warnings = Vec::new();
    let mut per_departement = BTreeMap::new();
    for (dept, quarters) in per_dept {
        if quarters.len() < 2 {
            warnings.push(format!(
                "departement {dept}: a single quarter, no growth computed"
            ));
        }
        let mut rows = Vec::with_capacity(quarters.len());
        let mut rates = Vec::new();
        let mut previous: Option<f64> = None;
        for (trimestre, median) in quarters {
            let growth_pct = previous.map(|prev| round2((median - prev) / prev * 100.0));
            if let Some(rate) = growth_pct {
                rates.push(rate);
            }
            rows.push(QuarterGrowth {
                trimestre,
                prix_m2_median: median,
                growth_pct,
            });
            previous = Some(median);
        }
        per_departement.insert(
            dept,
            DeptGrowth {
                quarters: rows,
                mean_growth_pct: mean(&rates).map(round2),
                volatility: std_dev(&rates).map(round2),
            },
        );
    }

    Ok(AnalysisOutcome::from_parts(
        QuarterlyGrowth { per_departement },
        warnings,
    ))
}

pub fn quarterly_growth(gold: &DataFrame) -> AnalysisOutcome<QuarterlyGrowth> {
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
    fn growth_rates_follow_the_quarter_sequence() {
        // deliberately out of order; the analysis sorts by quarter label
        let gold = df!(
            "departement" => ["92", "92", "92"],
            "trimestre" => ["2020Q2", "2020Q1", "2020Q3"],
            "prix_m2_median" => [5500.0, 5000.0, 5225.0],
        )
        .unwrap();
        let outcome = quarterly_growth(&gold);
        let result = outcome.result().expect("growth should compute");
        let dept = &result.per_departement["92"];

        assert_eq!(dept.quarters[0].trimestre, "2020Q1");
        assert_eq!(dept.quarters[0].growth_pct, None);
        assert_eq!(dept.quarters[1].growth_pct, Some(10.0));
        assert_eq!(dept.quarters[2].growth_pct, Some(-5.0));
        assert_eq!(dept.mean_growth_pct, Some(2.5));
    }

    #[test]
    fn single_quarter_department_degrades_to_partial() {
        let gold = df!(
            "departement" => ["34"],
            "trimestre" => ["2020Q1"],
            "prix_m2_median" => [3000.0],
        )
        .unwrap();
        let outcome = quarterly_growth(&gold);
        assert!(matches!(outcome, AnalysisOutcome::Partial { .. }));
    }
}
