//! Documents stored in a GitHub repository through the contents API.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{validate_key, DocumentError, DocumentStore, VersionedDocument};

const GITHUB_API_BASE: &str = "https://api.github.com";

/// Each write is a commit; the blob `sha` is the version token.
pub struct GithubDocumentStore {
    client: Client,
    api_base: String,
    repo: String,
    branch: String,
    token: SecretString,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(default)]
    content: String,
    sha: String,
}

#[derive(Debug, Serialize)]
struct PutRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: PutContent,
}

#[derive(Debug, Deserialize)]
struct PutContent {
    sha: String,
}

impl GithubDocumentStore {
    pub fn new(
        repo: impl Into<String>,
        branch: impl Into<String>,
        token: SecretString,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cexbook/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_base: GITHUB_API_BASE.to_string(),
            repo: repo.into(),
            branch: branch.into(),
            token,
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, key: &str) -> Result<String, DocumentError> {
        validate_key(key)?;
        Ok(format!("{}/repos/{}/contents/{key}", self.api_base, self.repo))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Authorization", format!("token {}", self.token.expose_secret()))
            .header("Accept", "application/vnd.github+json")
    }
}

async fn failure(response: reqwest::Response) -> DocumentError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    DocumentError::Http { status, body }
}

#[async_trait::async_trait]
impl DocumentStore for GithubDocumentStore {
    async fn read(&self, key: &str) -> Result<Option<VersionedDocument>, DocumentError> {
        let url = self.url(key)?;
        let response = self
            .authorized(self.client.get(&url))
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(failure(response).await);
        }

        let contents: ContentsResponse = response.json().await?;
        // GitHub wraps base64 content at 60 columns.
        let encoded: String = contents.content.split_whitespace().collect();
        let bytes = STANDARD.decode(encoded).map_err(|e| DocumentError::Http {
            status: 200,
            body: format!("undecodable content: {e}"),
        })?;
        let content = serde_json::from_slice(&bytes).map_err(|source| DocumentError::Malformed {
            key: key.to_string(),
            source,
        })?;

        Ok(Some(VersionedDocument {
            content,
            version: contents.sha,
        }))
    }

    async fn write(
        &self,
        key: &str,
        content: &Value,
        expected_version: Option<&str>,
        message: &str,
    ) -> Result<String, DocumentError> {
        let url = self.url(key)?;
        let bytes = serde_json::to_vec_pretty(content).map_err(|source| DocumentError::Malformed {
            key: key.to_string(),
            source,
        })?;
        let body = PutRequest {
            message,
            content: STANDARD.encode(bytes),
            branch: &self.branch,
            sha: expected_version,
        };

        let response = self
            .authorized(self.client.put(&url))
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => Err(DocumentError::Conflict {
                key: key.to_string(),
            }),
            status if status.is_success() => {
                let put: PutResponse = response.json().await?;
                Ok(put.content.sha)
            }
            _ => Err(failure(response).await),
        }
    }
}
