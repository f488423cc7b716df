use std::io::Cursor;

use polars::prelude::*;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::store::LakeStore;
use crate::transform::{parquet, require_columns};

/// Raw columns of interest in the pipe-delimited DVF export.
pub const DVF_RAW_COLUMNS: [&str; 6] = [
    "Date mutation",
    "Valeur fonciere",
    "Code departement",
    "Code commune",
    "Type local",
    "Surface reelle bati",
];

pub const DVF_PARTITION_COLUMNS: [&str; 3] = ["code_departement", "annee", "trimestre"];

/// Parse a raw DVF export: `|`-separated, header row, every column read as
/// text (typing happens in [`clean_dvf_frame`]).
pub fn read_dvf_csv(bytes: Vec<u8>) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .map_parse_options(|opts| opts.with_separator(b'|'))
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()?;
    Ok(df)
}

/// Bronze→Silver cleaning for one raw DVF frame.
///
/// Drops rows missing value or surface, converts decimal commas, keeps
/// `surface > 0` before deriving `prix_m2`, parses the mutation date
/// (`%d/%m/%Y`, unparseable rows dropped), derives `annee`/`trimestre` and
/// restricts to the departments in scope.
pub fn clean_dvf_frame(raw: DataFrame, departements: &[String]) -> Result<DataFrame> {
    require_columns(&raw, &DVF_RAW_COLUMNS, "bronze DVF")?;
    let scope = Series::new("departements", departements);

    let df = raw
        .lazy()
        .select([
            col("Date mutation").alias("date_mutation_raw"),
            col("Valeur fonciere").alias("valeur_fonciere_raw"),
            col("Surface reelle bati").alias("surface_raw"),
            col("Type local").alias("type_local"),
            col("Code commune").alias("code_commune"),
            col("Code departement").alias("code_departement_raw"),
        ])
        .filter(
            col("valeur_fonciere_raw")
                .is_not_null()
                .and(col("surface_raw").is_not_null()),
        )
        .with_columns([
            col("valeur_fonciere_raw")
                .str()
                .replace_all(lit(","), lit("."), true)
                .cast(DataType::Float64)
                .alias("valeur_fonciere"),
            col("surface_raw")
                .str()
                .replace_all(lit(","), lit("."), true)
                .cast(DataType::Float64)
                .alias("surface_reelle_bati"),
        ])
        // surface > 0 before the ratio, so the division can never blow up
        .filter(
            col("valeur_fonciere")
                .is_not_null()
                .and(col("surface_reelle_bati").gt(lit(0.0))),
        )
        .with_column((col("valeur_fonciere") / col("surface_reelle_bati")).alias("prix_m2"))
        .with_column(
            col("date_mutation_raw")
                .str()
                .to_date(StrptimeOptions {
                    format: Some("%d/%m/%Y".into()),
                    strict: false,
                    exact: true,
                    cache: true,
                })
                .alias("date_mutation"),
        )
        .filter(col("date_mutation").is_not_null())
        .with_column(col("date_mutation").dt().year().alias("annee"))
        .with_column(
            concat_str(
                [col("annee"), lit("Q"), col("date_mutation").dt().quarter()],
                "",
                true,
            )
            .alias("trimestre"),
        )
        // partition column without the space of the raw header
        .with_column(
            col("code_departement_raw")
                .str()
                .replace_all(lit(" "), lit(""), true)
                .alias("code_departement"),
        )
        .filter(col("code_departement").is_in(lit(scope)))
        .select([
            col("date_mutation"),
            col("valeur_fonciere"),
            col("surface_reelle_bati"),
            col("type_local"),
            col("code_commune"),
            col("code_departement"),
            col("prix_m2"),
            col("annee"),
            col("trimestre"),
        ])
        .collect()?;
    Ok(df)
}

/// Rebuild the Silver DVF dataset from every Bronze object in scope.
pub async fn transform_dvf(store: &LakeStore, config: &PipelineConfig) -> Result<Option<usize>> {
    let bronze = &config.buckets.bronze;
    let mut frames = Vec::new();

    for year in &config.dvf.years {
        let prefix = format!("dvf/{year}/");
        let keys = store.list_keys(bronze, &prefix).await?;
        if keys.is_empty() {
            warn!(year, "no DVF bronze objects for year");
            continue;
        }
        for key in keys {
            let bytes = store.get_object(bronze, &key).await?;
            let raw = read_dvf_csv(bytes)?;
            info!(key = key.as_str(), rows = raw.height(), "DVF raw file loaded");
            let cleaned = clean_dvf_frame(raw, &config.departements)?;
            info!(key = key.as_str(), rows = cleaned.height(), "DVF file cleaned");
            if cleaned.height() > 0 {
                frames.push(cleaned.lazy());
            }
        }
    }

    if frames.is_empty() {
        warn!("DVF: empty dataset after filtering, skipping Silver write");
        return Ok(None);
    }

    let df = concat(frames, UnionArgs::default())?.collect()?;
    let before = df.height();
    let df = df.unique_stable(None, UniqueKeepStrategy::First, None)?;
    if df.height() < before {
        info!(dropped = before - df.height(), "DVF duplicate rows removed");
    }

    store.ensure_bucket(&config.buckets.silver).await?;
    parquet::write_partitioned(
        store,
        &config.buckets.silver,
        "dvf",
        df.clone(),
        &DVF_PARTITION_COLUMNS,
    )
    .await?;
    Ok(Some(df.height()))
}
