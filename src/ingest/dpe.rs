use std::time::Duration;

use chrono::Utc;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::ingest::rate_limiter::RateLimiter;
use crate::store::LakeStore;

/// Fields requested from the DPE dataset; everything else is left behind at
/// the source.
pub const DPE_SELECT_FIELDS: [&str; 7] = [
    "numero_dpe",
    "date_etablissement_dpe",
    "code_insee_commune_actualise",
    "classe_consommation_energie",
    "classe_estimation_ges",
    "tr002_type_batiment_description",
    "tv016_departement_code",
];

/// One page of the data-fair lines endpoint: a results array and an optional
/// fully-qualified next-page URL.
#[derive(Debug, Deserialize)]
pub struct DpePage {
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
    pub next: Option<String>,
}

#[derive(Debug, Default)]
pub struct DeptIngestSummary {
    pub dept: String,
    pub records: u64,
    pub batches: u32,
    /// Pagination ended early because the API kept failing.
    pub abandoned: bool,
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub total_records: u64,
    pub total_batches: u32,
    pub failed_departements: Vec<String>,
}

/// Paginates the remote DPE API department by department and lands each page
/// verbatim in the Bronze bucket.
pub struct DpeIngestor<'a> {
    store: &'a LakeStore,
    config: &'a PipelineConfig,
    client: reqwest::Client,
    limiter: RateLimiter,
}

/// Filter expression for one department over the configured date range.
pub fn department_filter(dept: &str, date_start: &str, date_end: &str) -> String {
    format!("tv016_departement_code:\"{dept}\" AND date_etablissement_dpe:[{date_start} TO {date_end}]")
}

impl<'a> DpeIngestor<'a> {
    pub fn new(store: &'a LakeStore, config: &'a PipelineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.dpe.timeout_secs))
            .build()?;
        Ok(Self {
            store,
            config,
            client,
            limiter: RateLimiter::new(config.dpe.requests_per_min),
        })
    }

    /// First-page URL for a department; later pages come from the `next`
    /// token in each response.
    fn first_page_url(&self, dept: &str) -> Result<Url> {
        let dpe = &self.config.dpe;
        let select = DPE_SELECT_FIELDS.join(",");
        let qs = department_filter(dept, &dpe.date_start, &dpe.date_end);
        let size = dpe.page_size.to_string();
        Url::parse_with_params(
            &dpe.base_url,
            &[
                ("select", select.as_str()),
                ("qs", qs.as_str()),
                ("size", size.as_str()),
            ],
        )
        .map_err(|e| PipelineError::api(format!("invalid DPE endpoint URL: {e}")))
    }

    /// Fetch one page, retrying transient failures (429/5xx and transport
    /// errors) with exponential backoff. Non-transient HTTP errors fail
    /// immediately.
    async fn fetch_page(&self, url: &str) -> Result<DpePage> {
        let max_retries = self.config.dpe.max_retries;
        let mut attempt = 0u32;
        loop {
            self.limiter.acquire().await;
            debug!(url, attempt, "fetching DPE page");
            let failure = match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.json::<DpePage>().await?);
                    }
                    if !is_transient(status) {
                        return Err(PipelineError::api(format!(
                            "DPE API returned {status} for {url}"
                        )));
                    }
                    format!("status {status}")
                }
                Err(e) => format!("transport error: {e}"),
            };

            attempt += 1;
            if attempt > max_retries {
                return Err(PipelineError::api(format!(
                    "DPE page abandoned after {max_retries} retries ({failure}): {url}"
                )));
            }
            let backoff = backoff_delay(attempt);
            warn!(url, attempt, %failure, backoff_ms = backoff.as_millis() as u64, "transient DPE API failure, backing off");
            tokio::time::sleep(backoff).await;
        }
    }

    /// Persist one page verbatim under the department's Bronze prefix.
    async fn save_batch(&self, dept: &str, batch_num: u32, results: &[serde_json::Value]) -> Result<String> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let key = format!("dpe/{dept}/dpe_batch_{batch_num:04}_{timestamp}.json");
        let body = serde_json::to_vec_pretty(results)?;
        self.store
            .put_object(&self.config.buckets.bronze, &key, body)
            .await?;
        info!(dept, batch_num, records = results.len(), key = key.as_str(), "DPE batch saved");
        Ok(key)
    }

    /// Ingest every page for one department. Abandoned pagination (API kept
    /// failing) is a partial result, not an error; a failed page write is.
    pub async fn ingest_department(
        &self,
        dept: &str,
        max_batches: Option<u32>,
    ) -> Result<DeptIngestSummary> {
        info!(dept, "starting DPE ingestion");
        let mut summary = DeptIngestSummary {
            dept: dept.to_string(),
            ..Default::default()
        };
        let mut url = self.first_page_url(dept)?.to_string();
        let mut batch_num = 1u32;

        loop {
            if let Some(max) = max_batches {
                if batch_num > max {
                    info!(dept, max, "batch cap reached");
                    break;
                }
            }
            let page = match self.fetch_page(&url).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(dept, error = %e, "abandoning department pagination");
                    summary.abandoned = true;
                    break;
                }
            };
            if page.results.is_empty() {
                info!(dept, batch_num, "empty page, end of data");
                break;
            }

            self.save_batch(dept, batch_num, &page.results).await?;
            summary.records += page.results.len() as u64;
            summary.batches = batch_num;
            batch_num += 1;

            match page.next {
                Some(next) => url = next,
                None => {
                    info!(dept, "no continuation token, end of data");
                    break;
                }
            }
        }

        info!(
            dept,
            records = summary.records,
            batches = summary.batches,
            "DPE ingestion finished for department"
        );
        Ok(summary)
    }

    /// Ingest every configured department. A failing department is logged
    /// and skipped; the others still run.
    pub async fn ingest_all(&self, max_batches: Option<u32>) -> Result<IngestReport> {
        self.store
            .ensure_bucket(&self.config.buckets.bronze)
            .await?;

        let mut report = IngestReport::default();
        for dept in &self.config.departements {
            match self.ingest_department(dept, max_batches).await {
                Ok(summary) => {
                    report.total_records += summary.records;
                    report.total_batches += summary.batches;
                }
                Err(e) => {
                    error!(dept = dept.as_str(), error = %e, "department ingestion failed");
                    report.failed_departements.push(dept.clone());
                }
            }
        }
        info!(
            records = report.total_records,
            batches = report.total_batches,
            failed = report.failed_departements.len(),
            "DPE ingestion complete"
        );
        Ok(report)
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// 0.5s, 1s, 2s, 4s, ... capped at 30s.
fn backoff_delay(attempt: u32) -> Duration {
    let secs = 0.5 * 2f64.powi(attempt.saturating_sub(1) as i32);
    Duration::from_secs_f64(secs.min(30.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_expression_binds_department_and_range() {
        let qs = department_filter("92", "2020-01-01", "2021-06-30");
        assert_eq!(
            qs,
            "tv016_departement_code:\"92\" AND date_etablissement_dpe:[2020-01-01 TO 2021-06-30]"
        );
    }

    #[test]
    fn page_parses_results_and_next() {
        let body = r#"{
            "total": 2,
            "results": [{"numero_dpe": "a"}, {"numero_dpe": "b"}],
            "next": "https://example.org/lines?after=xyz"
        }"#;
        let page: DpePage = serde_json::from_str(body).unwrap();
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.next.as_deref(), Some("https://example.org/lines?after=xyz"));
    }

    #[test]
    fn last_page_has_no_next() {
        let page: DpePage = serde_json::from_str(r#"{"results": []}"#).unwrap();
        assert!(page.results.is_empty());
        assert!(page.next.is_none());
    }

    #[test]
    fn transient_statuses() {
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(StatusCode::BAD_GATEWAY));
        assert!(is_transient(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_transient(StatusCode::NOT_FOUND));
        assert!(!is_transient(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn backoff_doubles_from_half_a_second() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(2));
        assert_eq!(backoff_delay(60), Duration::from_secs(30));
    }
}
