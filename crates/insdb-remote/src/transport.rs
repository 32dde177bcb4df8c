//! HTTP plumbing for the InstrumentDB REST API.
//!
//! Endpoints are relative to `<server>/api/` (`entities/<uuid>/`), but an
//! absolute URL (a `next` page link, a `file_data` link) is accepted wherever
//! an endpoint is.

use insdb_core::{ConnectionConfig, InsDbError, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

/// The request primitives the remote backend needs.
///
/// A `GET` that answers 404 yields `Ok(None)`: whether that means a missing
/// UUID or a missing path is for the caller to say.
pub trait Transport: Send + Sync {
    fn get(&self, endpoint: &str) -> Result<Option<Value>>;

    fn post(&self, endpoint: &str, body: &Value) -> Result<Value>;

    fn patch(&self, endpoint: &str, body: &Value) -> Result<Value>;

    fn delete(&self, endpoint: &str) -> Result<()>;

    fn get_bytes(&self, endpoint: &str) -> Result<Vec<u8>>;

    /// The URL the server uses to refer to `endpoint` inside payloads.
    fn reference(&self, endpoint: &str) -> String;
}

/// Maps a non-2xx status to the error taxonomy. Conflict bodies are kept verbatim.
pub fn status_error(status: u16, endpoint: &str, body: &str) -> InsDbError {
    let body = body.trim();
    match status {
        401 => InsDbError::Authentication(format!("{endpoint}: credentials were rejected")),
        403 => InsDbError::PermissionDenied(if body.is_empty() {
            endpoint.to_string()
        } else {
            format!("{endpoint}: {body}")
        }),
        404 => InsDbError::invalid_path(endpoint, "no such resource on the server"),
        400 | 409 | 422 => InsDbError::Conflict(body.to_string()),
        _ => InsDbError::Transport(format!("{endpoint}: HTTP {status} {body}")),
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// Blocking `reqwest` client holding a session token.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    base: Url,
    token: String,
}

impl HttpTransport {
    /// Logs in with `POST /api/login` and keeps the returned token.
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let (username, password) = config.credentials()?;
        let invalid = |e: url::ParseError| {
            InsDbError::Transport(format!("invalid server address {}: {e}", config.server))
        };
        let server = Url::parse(&format!("{}/", config.server)).map_err(invalid)?;
        let base = server.join("api/").map_err(invalid)?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| InsDbError::Transport(format!("failed to build http client: {e}")))?;

        let login = base
            .join("login")
            .map_err(|e| InsDbError::Transport(e.to_string()))?;
        let response = client
            .post(login)
            .form(&[("username", username), ("password", password)])
            .send()
            .map_err(|e| InsDbError::Transport(format!("failed to reach {}: {e}", config.server)))?;

        let status = response.status().as_u16();
        if matches!(status, 400 | 401 | 403) {
            return Err(InsDbError::Authentication(format!(
                "unable to log in to {} as '{username}'",
                config.server
            )));
        }
        let response = check_status(response, "login")?;
        let LoginResponse { token } = response
            .json()
            .map_err(|e| InsDbError::Transport(format!("login: invalid response: {e}")))?;

        tracing::info!(server = %config.server, user = username, "logged in");
        Ok(Self {
            client,
            base,
            token,
        })
    }

    fn url(&self, endpoint: &str) -> Result<Url> {
        self.base
            .join(endpoint)
            .map_err(|e| InsDbError::Transport(format!("invalid endpoint {endpoint}: {e}")))
    }

    fn send(&self, request: RequestBuilder, endpoint: &str) -> Result<Response> {
        tracing::debug!(endpoint, "request");
        request
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .send()
            .map_err(|e| InsDbError::Transport(format!("{endpoint}: {e}")))
    }
}

fn check_status(response: Response, endpoint: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(status_error(status.as_u16(), endpoint, &body))
}

fn json_body(response: Response, endpoint: &str) -> Result<Value> {
    if response.status().as_u16() == 204 {
        return Ok(Value::Null);
    }
    response
        .json()
        .map_err(|e| InsDbError::Transport(format!("{endpoint}: invalid JSON: {e}")))
}

impl Transport for HttpTransport {
    fn get(&self, endpoint: &str) -> Result<Option<Value>> {
        let response = self.send(self.client.get(self.url(endpoint)?), endpoint)?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = check_status(response, endpoint)?;
        json_body(response, endpoint).map(Some)
    }

    fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let response = self.send(self.client.post(self.url(endpoint)?).json(body), endpoint)?;
        json_body(check_status(response, endpoint)?, endpoint)
    }

    fn patch(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let response = self.send(self.client.patch(self.url(endpoint)?).json(body), endpoint)?;
        json_body(check_status(response, endpoint)?, endpoint)
    }

    fn delete(&self, endpoint: &str) -> Result<()> {
        let response = self.send(self.client.delete(self.url(endpoint)?), endpoint)?;
        check_status(response, endpoint).map(|_| ())
    }

    fn get_bytes(&self, endpoint: &str) -> Result<Vec<u8>> {
        let response = self.send(self.client.get(self.url(endpoint)?), endpoint)?;
        let bytes = check_status(response, endpoint)?
            .bytes()
            .map_err(|e| InsDbError::Transport(format!("{endpoint}: failed to read body: {e}")))?;
        Ok(bytes.to_vec())
    }

    fn reference(&self, endpoint: &str) -> String {
        self.url(endpoint)
            .map(String::from)
            .unwrap_or_else(|_| endpoint.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_onto_the_taxonomy() {
        assert!(matches!(status_error(401, "entities/", ""), InsDbError::Authentication(_)));
        assert!(matches!(status_error(403, "entities/", ""), InsDbError::PermissionDenied(_)));
        assert!(matches!(status_error(404, "entities/", ""), InsDbError::InvalidPath { .. }));
        assert!(matches!(status_error(502, "entities/", "bad gateway"), InsDbError::Transport(_)));
    }

    #[test]
    fn conflict_detail_is_passed_through() {
        let body = r#"{"name": ["entity with this name already exists."]}"#;
        for status in [400, 409, 422] {
            match status_error(status, "entities/", body) {
                InsDbError::Conflict(detail) => assert_eq!(detail, body),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn login_requires_credentials() {
        let err = HttpTransport::connect(&ConnectionConfig::new("http://127.0.0.1:9")).unwrap_err();
        assert!(matches!(err, InsDbError::Authentication(_)));
    }
}
