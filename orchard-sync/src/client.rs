//! Client layer for REST and WebSocket connections.

use crate::config::{ReconnectConfig, SyncConfig};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::WebSocketStream;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Config error: {0}")]
    Config(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

pub type WsStream = WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Row-oriented REST client (`GET {base}/rest/v1/{table}?column=eq.value`).
#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderMap,
}

impl RestClient {
    pub fn new(config: &SyncConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        let auth_header = build_auth_headers(&config.auth)?;
        Ok(Self {
            client,
            base_url: config.rest_base_url.trim_end_matches('/').to_string(),
            auth_header,
        })
    }

    pub fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Select rows of `table` matching every `(column, value)` equality.
    pub async fn select<T>(&self, table: &str, filters: &[(&str, &str)]) -> Result<Vec<T>, ClientError>
    where
        T: serde::de::DeserializeOwned,
    {
        let query = eq_filters(filters);
        let response = self
            .client
            .get(self.table_url(table))
            .headers(self.auth_header.clone())
            .query(&query)
            .send()
            .await?;
        self.parse_response(response).await
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            let bytes = response.bytes().await?;
            Ok(serde_json::from_slice(&bytes)?)
        } else {
            let body = response.text().await?;
            Err(ClientError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Query pairs for equality filters, always selecting every column.
pub fn eq_filters(filters: &[(&str, &str)]) -> Vec<(String, String)> {
    std::iter::once(("select".to_string(), "*".to_string()))
        .chain(
            filters
                .iter()
                .map(|(column, value)| (column.to_string(), format!("eq.{value}"))),
        )
        .collect()
}

#[derive(Clone)]
pub struct WsClient {
    endpoint: String,
    auth_header: HeaderMap,
    reconnect: ReconnectConfig,
}

impl WsClient {
    pub fn new(config: &SyncConfig) -> Result<Self, ClientError> {
        let auth_header = build_auth_headers(&config.auth)?;
        Ok(Self {
            endpoint: config.ws_endpoint.clone(),
            auth_header,
            reconnect: config.reconnect.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn reconnect_config(&self) -> &ReconnectConfig {
        &self.reconnect
    }

    pub async fn connect(&self) -> Result<WsStream, ClientError> {
        let mut request = self.endpoint.as_str().into_client_request()?;
        let headers = request.headers_mut();
        for (name, value) in self.auth_header.iter() {
            let name = tokio_tungstenite::tungstenite::http::HeaderName::from_bytes(name.as_str().as_bytes())
                .map_err(|e| ClientError::Config(e.to_string()))?;
            let value = tokio_tungstenite::tungstenite::http::HeaderValue::from_bytes(value.as_bytes())
                .map_err(|e| ClientError::Config(e.to_string()))?;
            headers.insert(name, value);
        }
        let (stream, _) = tokio_tungstenite::connect_async(request).await?;
        Ok(stream)
    }
}

impl std::fmt::Debug for WsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClient")
            .field("endpoint", &self.endpoint)
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}

fn build_auth_headers(auth: &crate::config::AuthConfig) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("apikey"),
        HeaderValue::from_str(&auth.api_key).map_err(|e| ClientError::Config(e.to_string()))?,
    );
    let token = auth.jwt.as_deref().unwrap_or(&auth.api_key);
    let value = format!("Bearer {}", token);
    headers.insert(
        HeaderName::from_static("authorization"),
        HeaderValue::from_str(&value).map_err(|e| ClientError::Config(e.to_string()))?,
    );
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;

    #[test]
    fn test_eq_filters_prefix_select_all() {
        let query = eq_filters(&[("id", "A"), ("status", "active")]);
        assert_eq!(
            query,
            vec![
                ("select".to_string(), "*".to_string()),
                ("id".to_string(), "eq.A".to_string()),
                ("status".to_string(), "eq.active".to_string()),
            ]
        );
    }

    #[test]
    fn test_auth_headers_prefer_jwt_for_bearer() {
        let headers = build_auth_headers(&AuthConfig {
            api_key: "key".to_string(),
            jwt: Some("token".to_string()),
        })
        .unwrap();
        assert_eq!(headers["apikey"], "key");
        assert_eq!(headers["authorization"], "Bearer token");

        let headers = build_auth_headers(&AuthConfig {
            api_key: "key".to_string(),
            jwt: None,
        })
        .unwrap();
        assert_eq!(headers["authorization"], "Bearer key");
    }

    #[test]
    fn test_auth_headers_reject_invalid_values() {
        let result = build_auth_headers(&AuthConfig {
            api_key: "bad\nkey".to_string(),
            jwt: None,
        });
        assert!(matches!(result, Err(ClientError::Config(_))));
    }
}
