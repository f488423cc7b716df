//! Read-only re-check of the Gold invariants, plus a bucket listing.

use polars::prelude::*;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::gold::{ENERGY_CLASSES, GOLD_COMPLETE_KEY};
use crate::store::LakeStore;
use crate::transform::{parquet, require_columns};

#[derive(Debug)]
pub struct CheckReport {
    pub rule: &'static str,
    pub checked: usize,
    pub violations: usize,
}

fn pct_sum_expr() -> Expr {
    ENERGY_CLASSES
        .iter()
        .skip(1)
        .fold(col("classe_A_pct"), |acc, class| {
            acc + col(format!("classe_{class}_pct").as_str())
        })
}

fn any_pct_nonzero_expr() -> Expr {
    ENERGY_CLASSES
        .iter()
        .skip(1)
        .fold(col("classe_A_pct").neq(lit(0.0)), |acc, class| {
            acc.or(col(format!("classe_{class}_pct").as_str()).neq(lit(0.0)))
        })
}

/// Re-check the Gold testable properties on the flat file.
pub fn check_gold(gold: &DataFrame) -> Result<Vec<CheckReport>> {
    let mut required: Vec<String> = ["departement", "trimestre", "nb_ventes", "prix_m2_median", "dpe_total"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    for class in &ENERGY_CLASSES {
        required.push(format!("classe_{class}_pct"));
    }
    require_columns(gold, &required, "gold")?;

    let mut reports = Vec::new();

    // percentages sum to 100 ± 0.1 wherever diagnostics exist
    let with_dpe = gold
        .clone()
        .lazy()
        .filter(col("dpe_total").gt(lit(0)))
        .with_column(pct_sum_expr().alias("pct_sum"))
        .collect()?;
    let violations = with_dpe
        .clone()
        .lazy()
        .filter(col("pct_sum").lt(lit(99.9)).or(col("pct_sum").gt(lit(100.1))))
        .collect()?
        .height();
    reports.push(CheckReport {
        rule: "class percentages sum to 100 where dpe_total > 0",
        checked: with_dpe.height(),
        violations,
    });

    // rows with a zero total carry only zero percentages
    let zero_total = gold
        .clone()
        .lazy()
        .filter(col("dpe_total").eq(lit(0)))
        .collect()?;
    let violations = zero_total
        .clone()
        .lazy()
        .filter(any_pct_nonzero_expr())
        .collect()?
        .height();
    reports.push(CheckReport {
        rule: "class percentages all zero where dpe_total == 0",
        checked: zero_total.height(),
        violations,
    });

    // every aggregated row came from at least one sale
    let violations = gold
        .clone()
        .lazy()
        .filter(col("nb_ventes").lt(lit(1)).or(col("nb_ventes").is_null()))
        .collect()?
        .height();
    reports.push(CheckReport {
        rule: "every row records at least one sale",
        checked: gold.height(),
        violations,
    });

    // (departement, trimestre) is a key
    let unique = gold
        .select(["departement", "trimestre"])?
        .unique_stable(None, UniqueKeepStrategy::First, None)?;
    reports.push(CheckReport {
        rule: "no duplicate (departement, trimestre) key",
        checked: gold.height(),
        violations: gold.height() - unique.height(),
    });

    // market metrics are never null
    let violations = gold
        .clone()
        .lazy()
        .filter(col("prix_m2_median").is_null())
        .collect()?
        .height();
    reports.push(CheckReport {
        rule: "median price present on every row",
        checked: gold.height(),
        violations,
    });

    Ok(reports)
}

/// List the Gold bucket and re-check the invariants of the flat file.
pub async fn run_verify(store: &LakeStore, config: &PipelineConfig) -> Result<()> {
    let bucket = &config.buckets.gold;
    let entries = store.list_entries(bucket, "").await?;
    println!("🔍 Gold bucket {bucket}: {} objects", entries.len());
    for (key, size) in &entries {
        println!("   📄 {key} ({size} bytes)");
    }
    if entries.is_empty() {
        warn!(bucket, "gold bucket is empty");
    }

    let bytes = store.get_object(bucket, GOLD_COMPLETE_KEY).await?;
    let gold = parquet::decode_parquet(bytes)?;
    info!(rows = gold.height(), "gold flat file loaded for verification");

    let reports = check_gold(&gold)?;
    let mut failed = 0usize;
    for report in &reports {
        let status = if report.violations == 0 { "✅" } else { "❌" };
        println!(
            "{status} {} ({} checked, {} violations)",
            report.rule, report.checked, report.violations
        );
        failed += report.violations;
    }
    if failed > 0 {
        return Err(PipelineError::data(format!(
            "gold invariants violated ({failed} rows)"
        )));
    }
    println!("✅ All gold invariants hold");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gold_frame(
        totals: Vec<Option<i64>>,
        pct_a: Vec<f64>,
        pct_g: Vec<f64>,
        nb_ventes: Vec<i64>,
    ) -> DataFrame {
        let n = totals.len();
        let mut df = df!(
            "departement" => (0..n).map(|i| format!("d{i}")).collect::<Vec<_>>(),
            "trimestre" => vec!["2020Q1"; n],
            "nb_ventes" => nb_ventes,
            "prix_m2_median" => vec![3000.0; n],
            "prix_m2_mean" => vec![3100.0; n],
            "dpe_total" => totals,
        )
        .unwrap();
        for class in &ENERGY_CLASSES {
            let pct = match *class {
                "A" => pct_a.clone(),
                "G" => pct_g.clone(),
                _ => vec![0.0; n],
            };
            df.with_column(Series::new(&format!("classe_{class}_pct"), pct))
                .unwrap();
        }
        df
    }

    #[test]
    fn clean_gold_passes_every_rule() {
        let gold = gold_frame(
            vec![Some(10), Some(0), None],
            vec![40.0, 0.0, 0.0],
            vec![60.0, 0.0, 0.0],
            vec![3, 5, 2],
        );
        let reports = check_gold(&gold).unwrap();
        assert!(reports.iter().all(|r| r.violations == 0));
    }

    #[test]
    fn broken_percentages_are_flagged() {
        // sums to 90, not 100
        let gold = gold_frame(vec![Some(10)], vec![40.0], vec![50.0], vec![3]);
        let reports = check_gold(&gold).unwrap();
        let sum_rule = &reports[0];
        assert_eq!(sum_rule.violations, 1);
    }

    #[test]
    fn nonzero_percentage_on_zero_total_is_flagged() {
        let gold = gold_frame(vec![Some(0)], vec![10.0], vec![0.0], vec![3]);
        let reports = check_gold(&gold).unwrap();
        let zero_rule = &reports[1];
        assert_eq!(zero_rule.violations, 1);
    }

    #[test]
    fn missing_sales_are_flagged() {
        let gold = gold_frame(vec![Some(10)], vec![50.0], vec![50.0], vec![0]);
        let reports = check_gold(&gold).unwrap();
        let sales_rule = &reports[2];
        assert_eq!(sales_rule.violations, 1);
    }
}
