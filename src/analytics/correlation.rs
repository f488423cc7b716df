//! Correlation between market prices and the volume of energy diagnostics,
//! plus the spatial concentration of sales.

use std::collections::BTreeMap;

use polars::prelude::*;
use serde::Serialize;

use crate::analytics::{column_f64, column_str, pearson, round2, AnalysisOutcome};
use crate::error::Result;
use crate::transform::require_columns;

#[derive(Debug, Serialize)]
pub struct PriceEnergyCorrelation {
    /// Pearson r between `prix_m2_median` and `dpe_total` per department.
    pub correlation_by_departement: BTreeMap<String, f64>,
    /// Share of all sales held by each department, in percent.
    pub sales_share_pct: BTreeMap<String, f64>,
}

fn compute(gold: &DataFrame) -> Result<AnalysisOutcome<PriceEnergyCorrelation>> {
    require_columns(
        gold,
        &["departement", "prix_m2_median", "dpe_total", "nb_ventes"],
        "gold",
    )?;

    let departements = column_str(gold, "departement")?;
    let medians = column_f64(gold, "prix_m2_median")?;
    let totals = column_f64(gold, "dpe_total")?;
    let ventes = column_f64(gold, "nb_ventes")?;

    let mut series: BTreeMap<String, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    let mut sales: BTreeMap<String, f64> = BTreeMap::new();
    for i in 0..gold.height() {
        let Some(dept) = &departements[i] else { continue };
        if let Some(n) = ventes[i] {
            *sales.entry(dept.clone()).or_default() += n;
        }
        // left-join rows without diagnostics carry null totals; they cannot
        // contribute a correlation point
        if let (Some(median), Some(total)) = (medians[i], totals[i]) {
            let entry = series.entry(dept.clone()).or_default();
            entry.0.push(median);
            entry.1.push(total);
        }
    }

    if sales.is_empty() {
        return Ok(AnalysisOutcome::Failed {
            reason: "gold dataset holds no sales".to_string(),
        });
    }

    let mut warnings = Vec::new();
    let mut correlation_by_departement = BTreeMap::new();
    for (dept, (prices, totals)) in &series {
        match pearson(prices, totals) {
            Some(r) => {
                correlation_by_departement.insert(dept.clone(), (r * 1000.0).round() / 1000.0);
            }
            None => warnings.push(format!(
                "departement {dept}: not enough quarters for a correlation"
            )),
        }
    }

    let total_sales: f64 = sales.values().sum();
    let sales_share_pct = sales
        .iter()
        .map(|(dept, n)| (dept.clone(), round2(n / total_sales * 100.0)))
        .collect();

    Ok(AnalysisOutcome::from_parts(
        PriceEnergyCorrelation {
            correlation_by_departement,
            sales_share_pct,
        },
        warnings,
    ))
}

pub fn price_energy_correlation(gold: &DataFrame) -> AnalysisOutcome<PriceEnergyCorrelation> {
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
    fn correlations_and_shares_per_department() {
        let gold = df!(
            "departement" => ["92", "92", "92", "59"],
            "trimestre" => ["2020Q1", "2020Q2", "2020Q3", "2020Q1"],
            "prix_m2_median" => [Some(6000.0), Some(6200.0), Some(6400.0), Some(2000.0)],
            "dpe_total" => [Some(100i64), Some(150), Some(200), None],
            "nb_ventes" => [10i64, 20, 30, 40],
        )
        .unwrap();
        let outcome = price_energy_correlation(&gold);
        let result = outcome.result().expect("correlation should compute");

        // 92: perfectly linear → r = 1
        assert!((result.correlation_by_departement["92"] - 1.0).abs() < 1e-9);
        // 59 has a single row with a null total → no correlation, warning
        assert!(!result.correlation_by_departement.contains_key("59"));
        assert!(matches!(outcome, AnalysisOutcome::Partial { .. }));

        assert_eq!(result.sales_share_pct["92"], 60.0);
        assert_eq!(result.sales_share_pct["59"], 40.0);
    }

    #[test]
    fn missing_columns_fail() {
        let gold = df!("departement" => ["92"]).unwrap();
        assert!(price_energy_correlation(&gold).is_failed());
    }
}
