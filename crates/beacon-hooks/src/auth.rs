//! Channel authentication against the application server.
//!
//! The handshake is a POST to the configured auth endpoint carrying
//! `channel_name`, `socket_id`, and the client-supplied auth payload as
//! `channel_data`. Every failure on the way there — connect error, timeout,
//! non-success status, unparseable body — collapses into
//! [`AuthResult::Denied`] so callers have exactly one failure channel.

use async_trait::async_trait;
use beacon_core::{AuthResult, ChannelAuthenticator, ConnectionInfo};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Status reported to the connection when the application server could not
/// be reached or answered garbage.
const TRANSPORT_FAILURE_STATUS: u16 = 500;

/// HTTP-backed [`ChannelAuthenticator`].
pub struct HttpAuthenticator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAuthenticator {
    /// Create an authenticator posting to `endpoint`.
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

/// Expected shape of a successful auth response.
#[derive(Debug, Deserialize)]
struct AuthResponse {
    /// Opaque payload for the subscriber; a string or any JSON value.
    #[serde(default)]
    channel_data: Option<Value>,
}

/// Parse `channel_data` when it arrives as a JSON-encoded string.
///
/// The application endpoint is free to return plain strings; if the string
/// does not parse as JSON it is forwarded unchanged.
fn normalize_channel_data(data: Option<Value>) -> Option<Value> {
    match data {
        Some(Value::String(raw)) => match serde_json::from_str(&raw) {
            Ok(parsed) => Some(parsed),
            Err(_) => Some(Value::String(raw)),
        },
        other => other,
    }
}

#[async_trait]
impl ChannelAuthenticator for HttpAuthenticator {
    async fn authenticate(
        &self,
        conn: &ConnectionInfo,
        channel: &str,
        auth_token: Option<&str>,
    ) -> AuthResult {
        let mut form: Vec<(&str, &str)> = vec![
            ("channel_name", channel),
            ("socket_id", conn.id.as_str()),
        ];
        if let Some(token) = auth_token {
            form.push(("channel_data", token));
        }

        let mut request = self.client.post(&self.endpoint).form(&form);
        for (name, value) in &conn.auth_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(channel = %channel, connection = %conn.id, error = %err, "Auth request failed");
                return AuthResult::denied(TRANSPORT_FAILURE_STATUS, err.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            debug!(channel = %channel, connection = %conn.id, status = status.as_u16(), "Auth denied");
            return AuthResult::Denied {
                reason: if reason.is_empty() {
                    status.to_string()
                } else {
                    reason
                },
                status: status.as_u16(),
            };
        }

        match response.json::<AuthResponse>().await {
            Ok(body) => AuthResult::Authorized {
                channel_data: normalize_channel_data(body.channel_data),
            },
            Err(err) => {
                warn!(channel = %channel, connection = %conn.id, error = %err, "Auth response unparseable");
                AuthResult::denied(TRANSPORT_FAILURE_STATUS, err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_data_string_is_parsed_as_json() {
        let data = normalize_channel_data(Some(Value::String(
            r#"{"user_id":"u1","user_info":{"name":"Alice"}}"#.to_string(),
        )));

        assert_eq!(
            data,
            Some(json!({"user_id": "u1", "user_info": {"name": "Alice"}}))
        );
    }

    #[test]
    fn test_unparseable_string_is_forwarded_unchanged() {
        let data = normalize_channel_data(Some(Value::String("not json".to_string())));
        assert_eq!(data, Some(Value::String("not json".to_string())));
    }

    #[test]
    fn test_object_channel_data_passes_through() {
        let data = normalize_channel_data(Some(json!({"user_id": "u1"})));
        assert_eq!(data, Some(json!({"user_id": "u1"})));
    }

    #[test]
    fn test_absent_channel_data() {
        assert_eq!(normalize_channel_data(None), None);
    }

    #[test]
    fn test_auth_response_tolerates_extra_fields() {
        let body: AuthResponse =
            serde_json::from_str(r#"{"channel_data": "x", "status": "ok"}"#).unwrap();
        assert_eq!(body.channel_data, Some(Value::String("x".to_string())));

        let body: AuthResponse = serde_json::from_str("{}").unwrap();
        assert!(body.channel_data.is_none());
    }
}
