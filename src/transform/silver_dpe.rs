use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::store::LakeStore;
use crate::transform::parquet;

pub const DPE_PARTITION_COLUMNS: [&str; 3] = ["tv016_departement_code", "annee", "trimestre"];

/// Robust string coercion for the loosely-typed API payloads: numbers with
/// an integral value lose their `.0`, blanks become `None`.
pub fn clean_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let mut s = s.trim().to_string();
            if let Some(stripped) = s.strip_suffix(".0") {
                if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
                    s = stripped.to_string();
                }
            }
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else {
                n.as_f64().map(|f| {
                    if f.fract() == 0.0 {
                        format!("{}", f as i64)
                    } else {
                        f.to_string()
                    }
                })
            }
        }
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// ISO date prefix of the establishment timestamp, if parseable.
fn parse_dpe_date(value: &Value) -> Option<NaiveDate> {
    let s = clean_value(value)?;
    let prefix = s.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

#[derive(Debug, Default)]
pub struct DpeFrameStats {
    pub kept: usize,
    pub dropped_out_of_scope: usize,
    pub dropped_missing_date: usize,
}

/// Build the Silver DPE frame from raw Bronze pages.
///
/// Records outside the department scope or without a parseable
/// establishment date are dropped and counted.
pub fn frame_from_pages(
    pages: &[Vec<Value>],
    departements: &[String],
) -> Result<(Option<DataFrame>, DpeFrameStats)> {
    let mut stats = DpeFrameStats::default();

    let mut numero: Vec<Option<String>> = Vec::new();
    let mut date_iso: Vec<String> = Vec::new();
    let mut commune: Vec<Option<String>> = Vec::new();
    let mut classe_conso: Vec<Option<String>> = Vec::new();
    let mut classe_ges: Vec<Option<String>> = Vec::new();
    let mut type_batiment: Vec<Option<String>> = Vec::new();
    let mut dept: Vec<String> = Vec::new();
    let mut annee: Vec<i32> = Vec::new();
    let mut trimestre: Vec<String> = Vec::new();

    for page in pages {
        for record in page {
            let dept_code = match clean_value(&record["tv016_departement_code"]) {
                Some(code) if departements.contains(&code) => code,
                _ => {
                    stats.dropped_out_of_scope += 1;
                    continue;
                }
            };
            let date = match parse_dpe_date(&record["date_etablissement_dpe"]) {
                Some(date) => date,
                None => {
                    stats.dropped_missing_date += 1;
                    continue;
                }
            };
            let quarter = (date.month0() / 3) + 1;

            numero.push(clean_value(&record["numero_dpe"]));
            date_iso.push(date.format("%Y-%m-%d").to_string());
            commune.push(clean_value(&record["code_insee_commune_actualise"]));
            classe_conso.push(clean_value(&record["classe_consommation_energie"]));
            classe_ges.push(clean_value(&record["classe_estimation_ges"]));
            type_batiment.push(clean_value(&record["tr002_type_batiment_description"]));
            dept.push(dept_code);
            annee.push(date.year());
            trimestre.push(format!("{}Q{}", date.year(), quarter));
            stats.kept += 1;
        }
    }

    if stats.kept == 0 {
        return Ok((None, stats));
    }

    let df = df!(
        "numero_dpe" => numero,
        "date_etablissement_dpe" => date_iso,
        "code_insee_commune_actualise" => commune,
        "classe_consommation_energie" => classe_conso,
        "classe_estimation_ges" => classe_ges,
        "tr002_type_batiment_description" => type_batiment,
        "tv016_departement_code" => dept,
        "annee" => annee,
        "trimestre" => trimestre,
    )?;
    // ISO strings → typed date column
    let df = df
        .lazy()
        .with_column(col("date_etablissement_dpe").cast(DataType::Date))
        .collect()?;
    Ok((Some(df), stats))
}

/// Rebuild the Silver DPE dataset from every Bronze page in scope.
pub async fn transform_dpe(store: &LakeStore, config: &PipelineConfig) -> Result<Option<usize>> {
    let bronze = &config.buckets.bronze;
    let mut pages: Vec<Vec<Value>> = Vec::new();

    for dept in &config.departements {
        let prefix = format!("dpe/{dept}/");
        let keys = store.list_keys(bronze, &prefix).await?;
        if keys.is_empty() {
            warn!(dept = dept.as_str(), "no DPE bronze pages for department");
            continue;
        }
        for key in keys {
            let bytes = store.get_object(bronze, &key).await?;
            let page: Vec<Value> = serde_json::from_slice(&bytes)?;
            info!(key = key.as_str(), records = page.len(), "DPE bronze page loaded");
            pages.push(page);
        }
    }

    let (frame, stats) = frame_from_pages(&pages, &config.departements)?;
    info!(
        kept = stats.kept,
        out_of_scope = stats.dropped_out_of_scope,
        missing_date = stats.dropped_missing_date,
        "DPE records cleaned"
    );
    let df = match frame {
        Some(df) => df,
        None => {
            warn!("DPE: no exploitable records, skipping Silver write");
            return Ok(None);
        }
    };

    let before = df.height();
    let df = df.unique_stable(None, UniqueKeepStrategy::First, None)?;
    if df.height() < before {
        info!(dropped = before - df.height(), "DPE duplicate rows removed");
    }

    store.ensure_bucket(&config.buckets.silver).await?;
    parquet::write_partitioned(
        store,
        &config.buckets.silver,
        "dpe",
        df.clone(),
        &DPE_PARTITION_COLUMNS,
    )
    .await?;
    Ok(Some(df.height()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn departements() -> Vec<String> {
        vec!["92".to_string(), "59".to_string(), "34".to_string()]
    }

    #[test]
    fn clean_value_normalizes_numbers_and_blanks() {
        assert_eq!(clean_value(&json!("  92 ")), Some("92".to_string()));
        assert_eq!(clean_value(&json!("75056.0")), Some("75056".to_string()));
        assert_eq!(clean_value(&json!(75056.0)), Some("75056".to_string()));
        assert_eq!(clean_value(&json!(92)), Some("92".to_string()));
        assert_eq!(clean_value(&json!(1.5)), Some("1.5".to_string()));
        assert_eq!(clean_value(&json!("")), None);
        assert_eq!(clean_value(&Value::Null), None);
    }

    #[test]
    fn frame_derives_quarter_and_filters_scope() {
        let pages = vec![vec![
            json!({
                "numero_dpe": "dpe-1",
                "date_etablissement_dpe": "2020-02-10",
                "code_insee_commune_actualise": 92050.0,
                "classe_consommation_energie": "D",
                "classe_estimation_ges": "C",
                "tr002_type_batiment_description": "Logement",
                "tv016_departement_code": "92"
            }),
            json!({
                "numero_dpe": "dpe-2",
                "date_etablissement_dpe": "2020-11-03T00:00:00",
                "classe_consommation_energie": "G",
                "tv016_departement_code": 59
            }),
            // out of scope
            json!({
                "numero_dpe": "dpe-3",
                "date_etablissement_dpe": "2020-05-01",
                "tv016_departement_code": "75"
            }),
            // no usable date
            json!({
                "numero_dpe": "dpe-4",
                "tv016_departement_code": "92"
            }),
        ]];
        let (frame, stats) = frame_from_pages(&pages, &departements()).unwrap();
        let df = frame.unwrap();
        assert_eq!(stats.kept, 2);
        assert_eq!(stats.dropped_out_of_scope, 1);
        assert_eq!(stats.dropped_missing_date, 1);

        let trimestre = df.column("trimestre").unwrap().str().unwrap();
        assert_eq!(trimestre.get(0), Some("2020Q1"));
        assert_eq!(trimestre.get(1), Some("2020Q4"));

        let commune = df
            .column("code_insee_commune_actualise")
            .unwrap()
            .str()
            .unwrap();
        assert_eq!(commune.get(0), Some("92050"));

        let dept = df.column("tv016_departement_code").unwrap().str().unwrap();
        assert_eq!(dept.get(1), Some("59"));

        assert_eq!(
            df.column("date_etablissement_dpe").unwrap().dtype(),
            &DataType::Date
        );
    }

    #[test]
    fn empty_pages_produce_no_frame() {
        let (frame, stats) = frame_from_pages(&[], &departements()).unwrap();
        assert!(frame.is_none());
        assert_eq!(stats.kept, 0);
    }
}
