//! `reqwest` implementation of [`TrackerClient`] against tracker API v3.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use trackdocs_shared::{
    Attachment, Comment, Credentials, Issue, OrgKind, Result, TrackDocsError, TrackerConfig,
};

use crate::TrackerClient;

/// API version segment prefixed to every endpoint path.
const API_VERSION: &str = "v3";

/// User-Agent string for tracker requests.
const USER_AGENT: &str = concat!("trackdocs/", env!("CARGO_PKG_VERSION"));

/// Tracker client speaking HTTP+JSON.
///
/// Cloning is cheap; the underlying connection pool is shared.
#[derive(Clone)]
pub struct HttpTrackerClient {
    client: Client,
    base_url: Url,
    credentials: Credentials,
    org_header: &'static str,
}

impl HttpTrackerClient {
    /// Build a client from the `[tracker]` config section.
    pub fn new(config: &TrackerConfig, credentials: Credentials) -> Result<Self> {
        let base_url = trackdocs_shared::base_url(config)?;
        Self::with_base_url(
            base_url,
            credentials,
            config.org_kind,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Build a client against an explicit API root.
    pub fn with_base_url(
        base_url: Url,
        credentials: Credentials,
        org_kind: OrgKind,
        timeout: Duration,
    ) -> Result<Self> {
        if base_url.cannot_be_a_base() {
            return Err(TrackDocsError::config(format!(
                "tracker base_url cannot be a base: {base_url}"
            )));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TrackDocsError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            credentials,
            org_header: org_kind.header_name(),
        })
    }

    /// `<base>/v3/<segments...>`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(API_VERSION).extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: &Url) -> RequestBuilder {
        self.client
            .request(method, url.clone())
            .header("Authorization", format!("OAuth {}", self.credentials.token))
            .header(self.org_header, &self.credentials.org_id)
            .header("Accept", "application/json")
    }

    /// Send the request and turn transport failures and non-2xx statuses into errors.
    async fn send(&self, request: RequestBuilder, url: &Url) -> Result<Response> {
        debug!(%url, "tracker request");

        let response = request
            .send()
            .await
            .map_err(|e| TrackDocsError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => format!("failed to read error body: {e}"),
            };
            return Err(TrackDocsError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.send(self.request(Method::GET, &url), &url).await?;
        decode_json(response, &url).await
    }
}

async fn read_body(response: Response, url: &Url) -> Result<Vec<u8>> {
    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| TrackDocsError::Network(format!("{url}: failed to read body: {e}")))
}

async fn decode_json<T: DeserializeOwned>(response: Response, url: &Url) -> Result<T> {
    let body = read_body(response, url).await?;
    serde_json::from_slice(&body)
        .map_err(|e| TrackDocsError::decode(format!("{url}: error decoding response: {e}")))
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    async fn count_issues(&self) -> Result<u64> {
        let url = self.endpoint(&["issues", "_count"]);
        let request = self
            .request(Method::POST, &url)
            .json(&serde_json::json!({}));
        let response = self.send(request, &url).await?;
        decode_json(response, &url).await
    }

    async fn list_issues(&self, page: u32, per_page: u32) -> Result<Vec<Issue>> {
        let mut url = self.endpoint(&["issues"]);
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("perPage", &per_page.to_string())
            .append_pair("expand", "attachments");
        self.get_json(url).await
    }

    async fn list_comments(
        &self,
        issue_key: &str,
        offset: i64,
        per_page: u32,
    ) -> Result<Vec<Comment>> {
        let mut url = self.endpoint(&["issues", issue_key, "comments"]);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("expand", "attachments")
                .append_pair("perPage", &per_page.to_string());
            if offset > 0 {
                query.append_pair("id", &offset.to_string());
            }
        }
        self.get_json(url).await
    }

    async fn get_attachment(&self, issue_key: &str, attachment_id: &str) -> Result<Attachment> {
        let url = self.endpoint(&["issues", issue_key, "attachments", attachment_id]);
        self.get_json(url).await
    }

    async fn download_attachment(
        &self,
        issue_key: &str,
        attachment_id: &str,
        file_name: &str,
    ) -> Result<Vec<u8>> {
        let url = self.endpoint(&["issues", issue_key, "attachments", attachment_id, file_name]);
        let response = self.send(self.request(Method::GET, &url), &url).await?;
        read_body(response, &url).await
    }
}
