// Hand-crafted async HTTP client for the CrowdSec Local API (v1).
//
// Base path: /v1/
// Auth: X-Api-Key header (bouncer key)

use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::Error;
use crate::transport::TransportConfig;
use crate::types;

// ── Error response shape from the Local API ─────────────────────────

#[derive(serde::Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
}

// ── Response handling ───────────────────────────────────────────────

async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();
    if status.is_success() {
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            let preview = &body[..body.len().min(200)];
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            }
        })
    } else {
        Err(parse_error(status, resp).await)
    }
}

async fn handle_empty(resp: reqwest::Response) -> Result<(), Error> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(parse_error(status, resp).await)
    }
}

async fn parse_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Error::InvalidApiKey;
    }

    let raw = resp.text().await.unwrap_or_default();

    if let Ok(err) = serde_json::from_str::<ErrorResponse>(&raw) {
        Error::Api {
            status: status.as_u16(),
            message: err.message.unwrap_or_else(|| status.to_string()),
        }
    } else {
        Error::Api {
            status: status.as_u16(),
            message: if raw.is_empty() {
                status.to_string()
            } else {
                raw
            },
        }
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// Async client for the CrowdSec Local API.
///
/// Authenticates with a bouncer API key and communicates via JSON REST
/// endpoints under `/v1/`.
pub struct LapiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl LapiClient {
    // ── Constructors ────────────────────────────────────────────────

    /// Build from a bouncer key and transport config.
    ///
    /// Injects `X-Api-Key` as a default header on every request.
    pub fn from_api_key(
        base_url: &str,
        api_key: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        let mut key_value = HeaderValue::from_str(api_key.expose_secret()).map_err(|e| {
            Error::Api {
                status: 0,
                message: format!("invalid API key header value: {e}"),
            }
        })?;
        key_value.set_sensitive(true);
        headers.insert("X-Api-Key", key_value);

        let http = transport.build_client_with_headers(headers)?;
        let base_url = Self::normalize_base_url(base_url)?;

        Ok(Self { http, base_url })
    }

    /// Wrap an existing `reqwest::Client` (caller manages auth headers).
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let base_url = Self::normalize_base_url(base_url)?;
        Ok(Self { http, base_url })
    }

    /// Parse the base URL and guarantee a trailing slash so relative
    /// joins of `v1/…` behave.
    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let mut url = Url::parse(raw)?;
        let path = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{path}/"));
        Ok(url)
    }

    // ── URL builder ─────────────────────────────────────────────────

    /// Join a relative path (e.g. `"v1/decisions"`) onto the base URL.
    fn url(&self, path: &str) -> Url {
        // base_url always ends with `/`, so joining `v1/…` works.
        self.base_url
            .join(path)
            .expect("path should be valid relative URL")
    }

    // ── HTTP verbs ──────────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.url(path);
        debug!("GET {url}");

        let resp = self.http.get(url).send().await?;
        handle_response(resp).await
    }

    async fn get_with_params<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, Error> {
        let url = self.url(path);
        debug!("GET {url} params={params:?}");

        let resp = self.http.get(url).query(params).send().await?;
        handle_response(resp).await
    }

    async fn get_empty(&self, path: &str) -> Result<(), Error> {
        let url = self.url(path);
        debug!("GET {url}");

        let resp = self.http.get(url).send().await?;
        handle_empty(resp).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let url = self.url(path);
        debug!("POST {url}");

        let resp = self.http.post(url).json(body).send().await?;
        handle_response(resp).await
    }

    async fn post_no_response<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), Error> {
        let url = self.url(path);
        debug!("POST {url}");

        let resp = self.http.post(url).json(body).send().await?;
        handle_empty(resp).await
    }

    async fn delete(&self, path: &str) -> Result<(), Error> {
        let url = self.url(path);
        debug!("DELETE {url}");

        let resp = self.http.delete(url).send().await?;
        handle_empty(resp).await
    }

    async fn delete_with_params<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, Error> {
        let url = self.url(path);
        debug!("DELETE {url} params={params:?}");

        let resp = self.http.delete(url).query(params).send().await?;
        handle_response(resp).await
    }

    // ━━ Public API ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    // ── Decisions ───────────────────────────────────────────────────

    /// List active decisions matching the filter.
    ///
    /// The Local API answers `null` (not `[]`) when nothing matches,
    /// which normalizes to an empty vector here.
    pub async fn decisions(
        &self,
        filter: &types::DecisionFilter,
    ) -> Result<Vec<types::Decision>, Error> {
        let found: Option<Vec<types::Decision>> = self
            .get_with_params("v1/decisions", &filter.to_params())
            .await?;
        Ok(found.unwrap_or_default())
    }

    /// List active decisions against one IP.
    pub async fn decisions_for_ip(&self, ip: &str) -> Result<Vec<types::Decision>, Error> {
        self.decisions(&types::DecisionFilter::for_ip(ip)).await
    }

    /// Push decisions straight into the Local API.
    pub async fn create_decisions(&self, decisions: &[types::NewDecision]) -> Result<(), Error> {
        #[derive(Serialize)]
        struct Body<'a> {
            decisions: &'a [types::NewDecision],
        }

        self.post_no_response("v1/decisions", &Body { decisions })
            .await
    }

    /// Delete decisions matching the filter; returns how many went away.
    pub async fn delete_decisions(&self, filter: &types::DecisionFilter) -> Result<u64, Error> {
        #[derive(serde::Deserialize)]
        struct DeleteResponse {
            #[serde(rename = "nbDeleted", default)]
            nb_deleted: Option<String>,
        }

        let resp: DeleteResponse = self
            .delete_with_params("v1/decisions", &filter.to_params())
            .await?;
        Ok(resp
            .nb_deleted
            .and_then(|n| n.parse().ok())
            .unwrap_or_default())
    }

    // ── Alerts ──────────────────────────────────────────────────────

    pub async fn list_alerts(&self, limit: u32, offset: u32) -> Result<Vec<types::Alert>, Error> {
        let found: Option<Vec<types::Alert>> = self
            .get_with_params(
                "v1/alerts",
                &[("limit", limit.to_string()), ("offset", offset.to_string())],
            )
            .await?;
        Ok(found.unwrap_or_default())
    }

    pub async fn get_alert(&self, alert_id: i64) -> Result<types::Alert, Error> {
        self.get(&format!("v1/alerts/{alert_id}")).await
    }

    pub async fn delete_alert(&self, alert_id: i64) -> Result<(), Error> {
        self.delete(&format!("v1/alerts/{alert_id}")).await
    }

    // ── Bouncers ────────────────────────────────────────────────────

    /// Register a bouncer and return its freshly minted API key.
    pub async fn create_bouncer(&self, name: &str) -> Result<SecretString, Error> {
        #[derive(Serialize)]
        struct Body<'a> {
            name: &'a str,
        }

        let resp: types::BouncerCreateResponse =
            self.post("v1/bouncers", &Body { name }).await?;
        resp.api_key
            .map(SecretString::from)
            .ok_or_else(|| Error::Deserialization {
                message: "bouncer create response carried no api_key".to_owned(),
                body: String::new(),
            })
    }

    pub async fn delete_bouncer(&self, name: &str) -> Result<(), Error> {
        self.delete(&format!("v1/bouncers/{name}")).await
    }

    // ── Status ──────────────────────────────────────────────────────

    /// Liveness check; succeeds when the Local API accepts our key.
    pub async fn heartbeat(&self) -> Result<(), Error> {
        self.get_empty("v1/heartbeat").await
    }

    /// Engine version string, when the endpoint reports one.
    pub async fn version(&self) -> Result<Option<String>, Error> {
        let resp: types::VersionResponse = self.get("v1/version").await?;
        Ok(resp.version)
    }

    /// Raw metrics document (shape varies across engine versions).
    pub async fn metrics(&self) -> Result<serde_json::Value, Error> {
        self.get("v1/metrics").await
    }
}
