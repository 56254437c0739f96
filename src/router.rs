use crate::record::Section;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("router unreachable: {0}")]
    Unreachable(String),
    #[error("router did not answer within {0:?}")]
    Timeout(Duration),
    #[error("router rejected credentials: {0}")]
    Authentication(String),
    #[error("malformed router response: {0}")]
    Malformed(String),
    #[error("router answered with HTTP {0}")]
    Status(u16),
}

impl RouterError {
    /// Label used in the `error_class` log field.
    pub fn class(&self) -> &'static str {
        match self {
            RouterError::Unreachable(_) => "network",
            RouterError::Timeout(_) => "timeout",
            RouterError::Authentication(_) => "authentication",
            RouterError::Malformed(_) => "malformed_response",
            RouterError::Status(_) => "http_status",
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, RouterError::Authentication(_))
    }
}

/// Read-only view of a router's admin interface.
///
/// Calls are fallible and network bound; implementations must not retry on
/// their own.
#[async_trait]
pub trait RouterClient: Send + Sync {
    async fn firmware(&self) -> Result<Section, RouterError>;

    async fn status(&self) -> Result<Section, RouterError>;

    async fn ipv4_status(&self) -> Result<Section, RouterError>;

    async fn clients(&self) -> Result<Vec<Section>, RouterError>;

    async fn logout(&self) -> Result<(), RouterError> {
        Ok(())
    }
}

/// Talks to a router (or a local gateway in front of it) that serves its
/// admin data as JSON under `/api/*`, authenticated with HTTP basic auth.
pub struct HttpRouterClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    timeout: Duration,
}

impl HttpRouterClient {
    pub fn new(
        address: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RouterError> {
        let client = Client::builder()
            .user_agent(concat!("router-stats/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|err| RouterError::Unreachable(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url(address),
            username: username.into(),
            password: password.into(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, endpoint: &str) -> Result<Value, RouterError> {
        let url = format!("{}/api/{endpoint}", self.base_url);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|err| classify_transport(err, self.timeout))?;
        check_status(response.status())?;
        response.json::<Value>().await.map_err(|err| {
            if err.is_timeout() {
                classify_transport(err, self.timeout)
            } else {
                RouterError::Malformed(format!("{endpoint}: {err}"))
            }
        })
    }

    async fn get_section(&self, endpoint: &str) -> Result<Section, RouterError> {
        into_section(endpoint, self.get_json(endpoint).await?)
    }
}

#[async_trait]
impl RouterClient for HttpRouterClient {
    async fn firmware(&self) -> Result<Section, RouterError> {
        self.get_section("firmware").await
    }

    async fn status(&self) -> Result<Section, RouterError> {
        self.get_section("status").await
    }

    async fn ipv4_status(&self) -> Result<Section, RouterError> {
        self.get_section("ipv4").await
    }

    async fn clients(&self) -> Result<Vec<Section>, RouterError> {
        match self.get_json("clients").await? {
            Value::Array(items) => items
                .into_iter()
                .map(|item| into_section("clients", item))
                .collect(),
            other => Err(RouterError::Malformed(format!(
                "clients: expected an array, got {}",
                json_kind(&other)
            ))),
        }
    }

    async fn logout(&self) -> Result<(), RouterError> {
        let response = self
            .client
            .post(format!("{}/api/logout", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|err| classify_transport(err, self.timeout))?;
        check_status(response.status())
    }
}

fn base_url(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

fn check_status(status: StatusCode) -> Result<(), RouterError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RouterError::Authentication(status.to_string()));
    }
    if !status.is_success() {
        return Err(RouterError::Status(status.as_u16()));
    }
    Ok(())
}

fn classify_transport(err: reqwest::Error, timeout: Duration) -> RouterError {
    if err.is_timeout() {
        RouterError::Timeout(timeout)
    } else if err.is_decode() {
        RouterError::Malformed(err.to_string())
    } else {
        RouterError::Unreachable(err.to_string())
    }
}

fn into_section(endpoint: &str, value: Value) -> Result<Section, RouterError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(RouterError::Malformed(format!(
            "{endpoint}: expected an object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn base_url_adds_scheme_when_missing() {
        assert_eq!(base_url("192.168.0.1"), "http://192.168.0.1");
        assert_eq!(base_url("https://router.lan/"), "https://router.lan");
        assert_eq!(base_url(" http://10.0.0.1 "), "http://10.0.0.1");
    }

    #[test]
    fn unauthorized_and_forbidden_are_authentication_errors() {
        assert!(check_status(StatusCode::UNAUTHORIZED)
            .unwrap_err()
            .is_authentication());
        assert!(check_status(StatusCode::FORBIDDEN)
            .unwrap_err()
            .is_authentication());
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY),
            Err(RouterError::Status(502))
        ));
        assert!(check_status(StatusCode::OK).is_ok());
    }

    #[test]
    fn non_object_sections_are_malformed() {
        let err = into_section("status", json!([1, 2])).unwrap_err();
        assert_eq!(err.class(), "malformed_response");
        assert!(err.to_string().contains("expected an object, got an array"));
        assert!(into_section("status", json!({"online": true})).is_ok());
    }

    #[tokio::test]
    async fn unreachable_router_is_a_network_error() {
        // discard port, nothing listens there
        let client = HttpRouterClient::new(
            "127.0.0.1:9",
            "admin",
            "secret",
            Duration::from_secs(2),
        )
        .expect("build client");
        let err = client.firmware().await.unwrap_err();
        assert!(matches!(
            err,
            RouterError::Unreachable(_) | RouterError::Timeout(_)
        ));
        assert!(!err.is_authentication());
    }
}
