use std::io::Cursor;

use chrono::Utc;
use polars::prelude::*;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::store::LakeStore;

/// Encode a frame as a single Snappy-compressed Parquet buffer.
pub fn encode_parquet(df: &mut DataFrame) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf)
        .with_compression(ParquetCompression::Snappy)
        .finish(df)?;
    Ok(buf)
}

pub fn decode_parquet(bytes: Vec<u8>) -> Result<DataFrame> {
    Ok(ParquetReader::new(Cursor::new(bytes)).finish()?)
}

/// Split a frame on its partition columns.
///
/// Returns one `(relative_dir, frame)` pair per distinct partition key, the
/// directory rendered hive-style (`annee=2020/trimestre=2020Q1`). Partition
/// columns stay inside the part frames so readers never have to recover them
/// from key paths.
pub fn split_partitions(
    df: &DataFrame,
    partition_cols: &[&str],
) -> Result<Vec<(String, DataFrame)>> {
    let keys = df
        .select(partition_cols.iter().copied())?
        .unique_stable(None, UniqueKeepStrategy::First, None)?;

    let mut parts = Vec::with_capacity(keys.height());
    for i in 0..keys.height() {
        let mut segments = Vec::with_capacity(partition_cols.len());
        let mut mask: Option<Expr> = None;
        for name in partition_cols {
            let value = keys.column(name)?.get(i)?;
            let (rendered, condition) = match value {
                AnyValue::String(s) => (s.to_string(), col(*name).eq(lit(s.to_string()))),
                AnyValue::StringOwned(ref s) => {
                    (s.to_string(), col(*name).eq(lit(s.to_string())))
                }
                AnyValue::Int32(v) => (v.to_string(), col(*name).eq(lit(v))),
                AnyValue::Int64(v) => (v.to_string(), col(*name).eq(lit(v))),
                other => {
                    return Err(PipelineError::data(format!(
                        "unsupported partition value for column {name}: {other:?}"
                    )))
                }
            };
            segments.push(format!("{name}={rendered}"));
            mask = Some(match mask {
                Some(m) => m.and(condition),
                None => condition,
            });
        }
        let mask = mask.ok_or_else(|| PipelineError::data("no partition columns given"))?;
        let part = df.clone().lazy().filter(mask).collect()?;
        parts.push((segments.join("/"), part));
    }
    Ok(parts)
}

/// Write a frame as a partitioned Parquet dataset under
/// `s3://bucket/prefix/<col>=<val>/.../part-<ts>-<n>.parquet`.
pub async fn write_partitioned(
    store: &LakeStore,
    bucket: &str,
    prefix: &str,
    df: DataFrame,
    partition_cols: &[&str],
) -> Result<Vec<String>> {
    let parts = split_partitions(&df, partition_cols)?;
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut written = Vec::with_capacity(parts.len());
    for (idx, (dir, mut part)) in parts.into_iter().enumerate() {
        let key = format!("{prefix}/{dir}/part-{timestamp}-{idx:04}.parquet");
        let bytes = encode_parquet(&mut part)?;
        store.put_object(bucket, &key, bytes).await?;
        debug!(bucket, key = key.as_str(), rows = part.height(), "partition written");
        written.push(key);
    }
    info!(
        bucket,
        prefix,
        partitions = written.len(),
        rows = df.height(),
        "partitioned dataset written"
    );
    Ok(written)
}

/// Write a frame as one flat Parquet object.
pub async fn write_single(
    store: &LakeStore,
    bucket: &str,
    key: &str,
    df: &mut DataFrame,
) -> Result<()> {
    let bytes = encode_parquet(df)?;
    store.put_object(bucket, key, bytes).await?;
    info!(bucket, key, rows = df.height(), "flat file written");
    Ok(())
}

/// Read every part file under a prefix and concatenate.
///
/// Returns `None` when the prefix holds no Parquet objects, so callers can
/// warn-and-skip instead of writing from an empty frame.
pub async fn read_dataset(
    store: &LakeStore,
    bucket: &str,
    prefix: &str,
) -> Result<Option<DataFrame>> {
    let keys = store.list_keys(bucket, prefix).await?;
    let mut frames = Vec::new();
    for key in keys.iter().filter(|k| k.ends_with(".parquet")) {
        let bytes = store.get_object(bucket, key).await?;
        frames.push(decode_parquet(bytes)?.lazy());
    }
    if frames.is_empty() {
        return Ok(None);
    }
    let df = concat(frames, UnionArgs::default())?.collect()?;
    info!(bucket, prefix, rows = df.height(), "dataset loaded");
    Ok(Some(df))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DataFrame {
        df!(
            "code_departement" => ["92", "92", "59", "34"],
            "annee" => [2020i32, 2021, 2020, 2020],
            "trimestre" => ["2020Q1", "2021Q2", "2020Q1", "2020Q3"],
            "prix_m2" => [5000.0, 5200.0, 1800.0, 2600.0],
        )
        .unwrap()
    }

    #[test]
    fn partitions_cover_every_row_exactly_once() {
        let df = sample();
        let parts = split_partitions(&df, &["code_departement", "annee", "trimestre"]).unwrap();
        assert_eq!(parts.len(), 4);
        let total: usize = parts.iter().map(|(_, p)| p.height()).sum();
        assert_eq!(total, df.height());
    }

    #[test]
    fn partition_paths_are_hive_style() {
        let df = sample();
        let parts = split_partitions(&df, &["code_departement", "annee", "trimestre"]).unwrap();
        let dirs: Vec<&str> = parts.iter().map(|(d, _)| d.as_str()).collect();
        assert!(dirs.contains(&"code_departement=92/annee=2020/trimestre=2020Q1"));
        assert!(dirs.contains(&"code_departement=34/annee=2020/trimestre=2020Q3"));
    }

    #[test]
    fn partition_columns_stay_in_the_part_frames() {
        let df = sample();
        let parts = split_partitions(&df, &["code_departement"]).unwrap();
        for (_, part) in &parts {
            assert!(part.get_column_names().contains(&"code_departement"));
        }
    }

    #[test]
    fn parquet_buffer_roundtrip_preserves_shape() {
        let mut df = sample();
        let bytes = encode_parquet(&mut df).unwrap();
        let back = decode_parquet(bytes).unwrap();
        assert_eq!(back.shape(), df.shape());
        assert_eq!(back.get_column_names(), df.get_column_names());
    }
}
