//! Silver→Gold aggregation: market metrics per department × quarter, the
//! DPE class distribution, and their left join.

use polars::prelude::*;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::store::LakeStore;
use crate::transform::{parquet, require_columns};

pub const ENERGY_CLASSES: [&str; 7] = ["A", "B", "C", "D", "E", "F", "G"];

pub const GOLD_PREFIX: &str = "market_indicators";
pub const GOLD_COMPLETE_KEY: &str = "market_indicators/gold_complete.parquet";
pub const GOLD_PARTITION_COLUMNS: [&str; 2] = ["departement", "trimestre"];

fn class_column(class: &str) -> String {
    format!("classe_{class}")
}

fn pct_column(class: &str) -> String {
    format!("classe_{class}_pct")
}

/// Percentage of each class in the row total, one decimal; all-zero when
/// the total is zero.
pub(crate) fn percentage_exprs() -> Vec<Expr> {
    ENERGY_CLASSES
        .iter()
        .map(|class| {
            let counts = col(class_column(class).as_str());
            when(col("dpe_total").gt(lit(0)))
                .then(
                    (counts.cast(DataType::Float64) * lit(100.0)
                        / col("dpe_total").cast(DataType::Float64))
                    .round(1),
                )
                .otherwise(lit(0.0))
                .alias(pct_column(class).as_str())
        })
        .collect()
}

/// Market metrics per (departement, trimestre): sales count, median and
/// mean price per m², both rounded to whole euros.
///
/// Accepts either the Silver partition column `code_departement` or the
/// legacy raw header `Code departement`.
pub fn aggregate_market(dvf: DataFrame) -> Result<DataFrame> {
    let dept_expr = if dvf.get_column_names().contains(&"code_departement") {
        col("code_departement")
    } else if dvf.get_column_names().contains(&"Code departement") {
        col("Code departement")
    } else {
        return Err(PipelineError::missing_columns(
            "silver DVF",
            vec!["code_departement".to_string()],
        ));
    };
    require_columns(&dvf, &["trimestre", "prix_m2"], "silver DVF")?;

    let df = dvf
        .lazy()
        .with_column(dept_expr.cast(DataType::String).alias("departement"))
        .drop_nulls(Some(vec![
            col("departement"),
            col("trimestre"),
            col("prix_m2"),
        ]))
        .group_by([col("departement"), col("trimestre")])
        .agg([
            col("prix_m2").count().cast(DataType::Int64).alias("nb_ventes"),
            col("prix_m2").median().round(0).alias("prix_m2_median"),
            col("prix_m2").mean().round(0).alias("prix_m2_mean"),
        ])
        .sort(["departement", "trimestre"], SortMultipleOptions::default())
        .collect()?;
    Ok(df)
}

/// DPE class distribution per (departement, trimestre).
///
/// Conditional aggregation keeps all seven `classe_*` columns in the output
/// whatever classes actually occur, so the Gold shape never depends on the
/// data.
pub fn aggregate_energy(dpe: DataFrame) -> Result<DataFrame> {
    require_columns(
        &dpe,
        &[
            "tv016_departement_code",
            "trimestre",
            "classe_consommation_energie",
        ],
        "silver DPE",
    )?;

    let scope = Series::new("classes", ENERGY_CLASSES.to_vec());
    let count_exprs: Vec<Expr> = ENERGY_CLASSES
        .iter()
        .map(|class| {
            col("classe_consommation_energie")
                .eq(lit(*class))
                .cast(DataType::Int64)
                .sum()
                .alias(class_column(class).as_str())
        })
        .collect();
    let total_expr = ENERGY_CLASSES
        .iter()
        .skip(1)
        .fold(col(class_column(ENERGY_CLASSES[0]).as_str()), |acc, class| {
            acc + col(class_column(class).as_str())
        });

    let df = dpe
        .lazy()
        .drop_nulls(Some(vec![
            col("tv016_departement_code"),
            col("trimestre"),
            col("classe_consommation_energie"),
        ]))
        .filter(col("classe_consommation_energie").is_in(lit(scope)))
        .group_by([
            col("tv016_departement_code")
                .cast(DataType::String)
                .alias("departement"),
            col("trimestre"),
        ])
        .agg(count_exprs)
        .with_column(total_expr.alias("dpe_total"))
        .with_columns(percentage_exprs())
        .sort(["departement", "trimestre"], SortMultipleOptions::default())
        .collect()?;
    Ok(df)
}

/// Left join: every market row survives; quarters with no diagnostics keep
/// null DPE metrics, never fabricated zeros. (The decote analysis uses the
/// other, commune-level inner join — see `analytics`.)
pub fn join_market_energy(market: DataFrame, energy: DataFrame) -> Result<DataFrame> {
    let df = market
        .lazy()
        .join(
            energy.lazy(),
            [col("departement"), col("trimestre")],
            [col("departement"), col("trimestre")],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;
    Ok(df)
}

/// Full Gold frame: aggregate both sides, join, derive `annee`, order the
/// columns.
pub fn build_gold_frame(dvf: DataFrame, dpe: DataFrame) -> Result<DataFrame> {
    let market = aggregate_market(dvf)?;
    let energy = aggregate_energy(dpe)?;
    let joined = join_market_energy(market, energy)?;

    let mut ordered: Vec<Expr> = vec![
        col("departement"),
        col("annee"),
        col("trimestre"),
        col("nb_ventes"),
        col("prix_m2_median"),
        col("prix_m2_mean"),
        col("dpe_total"),
    ];
    for class in &ENERGY_CLASSES {
        ordered.push(col(class_column(class).as_str()));
    }
    for class in &ENERGY_CLASSES {
        ordered.push(col(pct_column(class).as_str()));
    }

    let df = joined
        .lazy()
        .with_column(
            col("trimestre")
                .str()
                .replace(lit("Q[1-4]$"), lit(""), false)
                .cast(DataType::Int32)
                .alias("annee"),
        )
        .select(ordered)
        .sort(["departement", "trimestre"], SortMultipleOptions::default())
        .collect()?;
    info!(rows = df.height(), "gold frame built");
    Ok(df)
}

/// Rebuild Gold from Silver and persist it both as one flat file and as a
/// partitioned dataset.
pub async fn run_gold(store: &LakeStore, config: &PipelineConfig) -> Result<()> {
    let silver = &config.buckets.silver;
    let dvf = match parquet::read_dataset(store, silver, "dvf").await? {
        Some(df) => df,
        None => {
            warn!("silver DVF dataset is empty, aborting Gold build");
            return Ok(());
        }
    };
    let dpe = match parquet::read_dataset(store, silver, "dpe").await? {
        Some(df) => df,
        None => {
            warn!("silver DPE dataset is empty, aborting Gold build");
            return Ok(());
        }
    };

    let mut gold = build_gold_frame(dvf, dpe)?;

    store.ensure_bucket(&config.buckets.gold).await?;
    parquet::write_single(store, &config.buckets.gold, GOLD_COMPLETE_KEY, &mut gold).await?;
    parquet::write_partitioned(
        store,
        &config.buckets.gold,
        GOLD_PREFIX,
        gold,
        &GOLD_PARTITION_COLUMNS,
    )
    .await?;
    Ok(())
}
