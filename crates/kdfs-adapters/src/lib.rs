//! External API clients for KDFS: the paginated safety-data feeds and the
//! search enrichment service.

use std::time::Duration;

use chrono::NaiveDate;
use kdfs_core::{RawMessageRecord, RawNewsRecord, SourceKind, NO_LINK_AVAILABLE};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use tracing::{debug, error};

pub const CRATE_NAME: &str = "kdfs-adapters";

/// Application-level success sentinel in the feed response envelope.
pub const RESULT_SUCCESS: &str = "00";

const DAY_FORMAT: &str = "%Y%m%d";
const HEADER_CLIENT_ID: &str = "X-Naver-Client-Id";
const HEADER_CLIENT_SECRET: &str = "X-Naver-Client-Secret";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("api error {code}: {message}")]
    Api { code: String, message: String },
}

/// Common `{header, body}` envelope wrapping every feed response.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T> {
    #[serde(default)]
    pub header: EnvelopeHeader,
    #[serde(default)]
    pub body: Vec<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvelopeHeader {
    #[serde(rename = "resultCode", default)]
    pub result_code: String,
    #[serde(rename = "resultMsg", default)]
    pub result_msg: String,
}

/// Unwrap an envelope, rejecting non-success application result codes.
pub fn records_from_envelope<T>(envelope: Envelope<T>) -> Result<Vec<T>, FetchError> {
    if envelope.header.result_code != RESULT_SUCCESS {
        return Err(FetchError::Api {
            code: envelope.header.result_code,
            message: envelope.header.result_msg,
        });
    }
    Ok(envelope.body)
}

#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    pub news_url: String,
    pub news_service_key: String,
    pub message_url: String,
    pub message_service_key: String,
    pub page_size: u32,
    pub timeout: Duration,
}

/// Client for the two paginated government feeds. A page fetch never errors
/// out to the caller: every failure mode collapses to an empty page, which
/// the sync driver treats the same as end-of-pagination.
#[derive(Debug, Clone)]
pub struct FeedClient {
    http: reqwest::Client,
    config: FeedClientConfig,
}

impl FeedClient {
    pub fn new(config: FeedClientConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub async fn fetch_news_page(&self, day: NaiveDate, page_no: u32) -> Vec<RawNewsRecord> {
        self.fetch_page_or_empty(
            SourceKind::News,
            &self.config.news_url,
            &self.config.news_service_key,
            "inqDt",
            day,
            page_no,
        )
        .await
    }

    pub async fn fetch_message_page(&self, day: NaiveDate, page_no: u32) -> Vec<RawMessageRecord> {
        self.fetch_page_or_empty(
            SourceKind::Messages,
            &self.config.message_url,
            &self.config.message_service_key,
            "crtDt",
            day,
            page_no,
        )
        .await
    }

    async fn fetch_page_or_empty<T: DeserializeOwned>(
        &self,
        source: SourceKind,
        url: &str,
        service_key: &str,
        day_param: &str,
        day: NaiveDate,
        page_no: u32,
    ) -> Vec<T> {
        match self
            .fetch_page(url, service_key, day_param, day, page_no)
            .await
        {
            Ok(records) => {
                debug!(%source, %day, page_no, count = records.len(), "fetched page");
                records
            }
            Err(err) => {
                // The driver cannot tell this apart from end-of-data; it
                // stops paginating this day for this source either way.
                error!(%source, %day, page_no, error = %err, "page fetch failed, treating as empty");
                Vec::new()
            }
        }
    }

    async fn fetch_page<T: DeserializeOwned>(
        &self,
        url: &str,
        service_key: &str,
        day_param: &str,
        day: NaiveDate,
        page_no: u32,
    ) -> Result<Vec<T>, FetchError> {
        let params = [
            ("serviceKey", service_key.to_string()),
            ("pageNo", page_no.to_string()),
            ("numOfRows", self.config.page_size.to_string()),
            (day_param, day.format(DAY_FORMAT).to_string()),
            ("returnType", "json".to_string()),
        ];
        let response = self.http.get(url).query(&params).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        let text = response.text().await?;
        let envelope: Envelope<T> = serde_json::from_str(&text)?;
        records_from_envelope(envelope)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchItem {
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub originallink: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub items: Vec<SearchItem>,
}

/// First item's `link`, falling back to its `originallink`, falling back to
/// the sentinel.
pub fn link_from_items(items: &[SearchItem]) -> String {
    items
        .first()
        .and_then(|item| item.link.clone().or_else(|| item.originallink.clone()))
        .unwrap_or_else(|| NO_LINK_AVAILABLE.to_string())
}

#[derive(Debug, Clone)]
pub struct SearchClientConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub timeout: Duration,
    /// Enforced after every query, success or failure, to stay under the
    /// remote API's throughput limit.
    pub throttle: Duration,
}

/// Client for the search enrichment API. `best_link` is total: any failure
/// degrades to the sentinel so one bad enrichment never sinks a batch.
#[derive(Debug, Clone)]
pub struct SearchClient {
    http: reqwest::Client,
    config: SearchClientConfig,
}

impl SearchClient {
    pub fn new(config: SearchClientConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub async fn best_link(&self, title: &str) -> String {
        let link = match self.query(title).await {
            Ok(response) => link_from_items(&response.items),
            Err(err) => {
                error!(title, error = %err, "search enrichment failed, using sentinel");
                NO_LINK_AVAILABLE.to_string()
            }
        };
        tokio::time::sleep(self.config.throttle).await;
        link
    }

    async fn query(&self, title: &str) -> Result<SearchResponse, FetchError> {
        let response = self
            .http
            .get(&self.config.base_url)
            .header(HEADER_CLIENT_ID, &self.config.client_id)
            .header(HEADER_CLIENT_SECRET, &self.config.client_secret)
            .query(&[
                ("query", title),
                ("display", "10"),
                ("start", "1"),
                ("sort", "sim"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_yields_body() {
        let envelope: Envelope<RawMessageRecord> = serde_json::from_str(
            r#"{
                "header": {"resultCode": "00", "resultMsg": "NORMAL SERVICE"},
                "body": [{"SN": 1, "REG_YMD": "2025/03/21 10:15:30.123456"}]
            }"#,
        )
        .expect("deserializes");
        let records = records_from_envelope(envelope).expect("successful envelope");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sn, 1);
    }

    #[test]
    fn non_success_result_code_is_an_api_error() {
        let envelope: Envelope<RawNewsRecord> = serde_json::from_str(
            r#"{"header": {"resultCode": "30", "resultMsg": "SERVICE_KEY_IS_NOT_REGISTERED"}, "body": []}"#,
        )
        .expect("deserializes");
        match records_from_envelope(envelope) {
            Err(FetchError::Api { code, .. }) => assert_eq!(code, "30"),
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[test]
    fn missing_body_defaults_to_empty() {
        let envelope: Envelope<RawNewsRecord> =
            serde_json::from_str(r#"{"header": {"resultCode": "00", "resultMsg": "ok"}}"#)
                .expect("deserializes");
        assert!(records_from_envelope(envelope).expect("success").is_empty());
    }

    #[test]
    fn malformed_body_is_a_decode_error() {
        let result: Result<Envelope<RawNewsRecord>, _> = serde_json::from_str("not json at all");
        assert!(result.is_err());
    }

    #[test]
    fn first_link_wins() {
        let items = vec![
            SearchItem {
                link: Some("https://n.news.example/a".into()),
                originallink: Some("https://orig.example/a".into()),
            },
            SearchItem {
                link: Some("https://n.news.example/b".into()),
                originallink: None,
            },
        ];
        assert_eq!(link_from_items(&items), "https://n.news.example/a");
    }

    #[test]
    fn originallink_is_the_fallback() {
        let items = vec![SearchItem {
            link: None,
            originallink: Some("https://orig.example/a".into()),
        }];
        assert_eq!(link_from_items(&items), "https://orig.example/a");
    }

    #[test]
    fn empty_result_set_yields_sentinel() {
        assert_eq!(link_from_items(&[]), NO_LINK_AVAILABLE);
        let items = vec![SearchItem {
            link: None,
            originallink: None,
        }];
        assert_eq!(link_from_items(&items), NO_LINK_AVAILABLE);
    }

    #[tokio::test]
    async fn best_link_is_total_on_connection_failure() {
        let client = SearchClient::new(SearchClientConfig {
            base_url: "http://127.0.0.1:1/v1/search/news.json".into(),
            client_id: "id".into(),
            client_secret: "secret".into(),
            timeout: Duration::from_millis(500),
            throttle: Duration::from_millis(1),
        })
        .expect("client builds");
        assert_eq!(client.best_link("aftershock warning").await, NO_LINK_AVAILABLE);
    }

    #[tokio::test]
    async fn fetch_page_degrades_to_empty_on_connection_failure() {
        let client = FeedClient::new(FeedClientConfig {
            news_url: "http://127.0.0.1:1/api/news".into(),
            news_service_key: "key".into(),
            message_url: "http://127.0.0.1:1/api/messages".into(),
            message_service_key: "key".into(),
            page_size: 30,
            timeout: Duration::from_millis(500),
        })
        .expect("client builds");
        let day = NaiveDate::from_ymd_opt(2025, 3, 20).unwrap();
        assert!(client.fetch_news_page(day, 1).await.is_empty());
        assert!(client.fetch_message_page(day, 1).await.is_empty());
    }
}
