//! Backend sync API
//!
//! The engine talks to the server only through [`RemoteMutationApi`]; the
//! HTTP implementation maps status codes onto the three outcomes the engine
//! distinguishes:
//!
//! - `409` → [`RemoteError::VersionConflict`], carrying the server's state
//! - `408`, `429`, `5xx` and network failures → [`RemoteError::Transient`]
//! - any other `4xx` → [`RemoteError::Rejected`]

use crate::conflict_resolution::ServerState;
use crate::error::{SyncError, SyncResult};
use crate::models::{EntityKind, MutationAction};
use async_trait::async_trait;
use logger_redacted::PiiRedactor;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".to_string(),
            timeout_secs: 30,
        }
    }
}

/// One queued mutation as sent to the server
#[derive(Debug, Clone)]
pub struct RemoteMutation {
    /// Queue item id; the server uses it to drop replays
    pub idempotency_key: Uuid,
    pub kind: EntityKind,
    pub action: MutationAction,
    pub entity_id: String,
    pub base_version: Option<i64>,
    /// Full record JSON, `None` for deletes
    pub data: Option<Value>,
    pub session_token: SecretString,
}

/// Server accepted the mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerAck {
    pub version: i64,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("sync API unavailable: {0}")]
    Transient(String),

    #[error("server holds version {server_version:?} (deleted: {deleted})")]
    VersionConflict {
        server_version: Option<i64>,
        server_data: Option<Value>,
        deleted: bool,
    },

    #[error("server rejected mutation ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl RemoteError {
    /// Server side of a version conflict
    pub fn server_state(&self) -> Option<ServerState> {
        match self {
            Self::VersionConflict {
                server_version,
                server_data,
                deleted,
            } => Some(ServerState {
                version: *server_version,
                deleted: *deleted,
                data: server_data.clone(),
            }),
            _ => None,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteMutationApi: Send + Sync {
    async fn submit(&self, mutation: &RemoteMutation) -> Result<ServerAck, RemoteError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MutationBody<'a> {
    base_version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ConflictBody {
    server_version: Option<i64>,
    server_data: Option<Value>,
    deleted: bool,
}

/// [`RemoteMutationApi`] over HTTPS
pub struct HttpRemoteApi {
    client: reqwest::Client,
    base_url: String,
    redactor: PiiRedactor,
}

impl HttpRemoteApi {
    /// # Errors
    ///
    /// [`SyncError::Internal`] when the TLS backend cannot be initialised.
    pub fn new(config: &RemoteConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            redactor: PiiRedactor::default(),
        })
    }

    #[must_use]
    pub fn with_redactor(mut self, redactor: PiiRedactor) -> Self {
        self.redactor = redactor;
        self
    }

    fn url(&self, mutation: &RemoteMutation) -> String {
        format!(
            "{}/sync/{}/{}",
            self.base_url,
            mutation.kind.path_segment(),
            mutation.entity_id
        )
    }
}

#[async_trait]
impl RemoteMutationApi for HttpRemoteApi {
    async fn submit(&self, mutation: &RemoteMutation) -> Result<ServerAck, RemoteError> {
        let url = self.url(mutation);
        let request = match mutation.action {
            MutationAction::Create => self.client.post(&url),
            MutationAction::Update => self.client.put(&url),
            MutationAction::Delete => self.client.delete(&url),
        };

        let body = MutationBody {
            base_version: mutation.base_version,
            data: mutation.data.as_ref(),
        };

        let response = request
            .bearer_auth(mutation.session_token.expose_secret())
            .header("Idempotency-Key", mutation.idempotency_key.to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;

        let status = response.status();
        tracing::debug!(
            queue_item_id = %mutation.idempotency_key,
            entity_kind = ?mutation.kind,
            status = status.as_u16(),
            "Sync API responded"
        );

        if status == StatusCode::NO_CONTENT {
            return Ok(ServerAck {
                version: mutation.base_version.unwrap_or(0) + 1,
                data: None,
            });
        }

        if status.is_success() {
            return response
                .json::<ServerAck>()
                .await
                .map_err(|e| RemoteError::Transient(format!("malformed acknowledgement: {e}")));
        }

        if status == StatusCode::CONFLICT {
            let body: ConflictBody = response.json().await.unwrap_or_default();
            return Err(RemoteError::VersionConflict {
                server_version: body.server_version,
                server_data: body.server_data,
                deleted: body.deleted,
            });
        }

        if status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            return Err(RemoteError::Transient(format!("status {status}")));
        }

        let text = response.text().await.unwrap_or_default();
        Err(RemoteError::Rejected {
            status: status.as_u16(),
            message: self.redactor.redact(&text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mutation(action: MutationAction, base_version: Option<i64>) -> RemoteMutation {
        RemoteMutation {
            idempotency_key: Uuid::new_v4(),
            kind: EntityKind::Entity,
            action,
            entity_id: "e1".to_string(),
            base_version,
            data: (action != MutationAction::Delete).then(|| json!({"name": "Camp B"})),
            session_token: SecretString::new("tok".to_string()),
        }
    }

    fn api(server: &mockito::Server) -> HttpRemoteApi {
        HttpRemoteApi::new(&RemoteConfig {
            base_url: format!("{}/", server.url()),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_update_success() {
        let mut server = mockito::Server::new_async().await;
        let m = mutation(MutationAction::Update, Some(3));
        let mock = server
            .mock("PUT", "/sync/entity/e1")
            .match_header("authorization", "Bearer tok")
            .match_header("idempotency-key", m.idempotency_key.to_string().as_str())
            .match_body(mockito::Matcher::PartialJson(json!({"baseVersion": 3})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"version": 4, "data": {"name": "Camp B"}}"#)
            .create_async()
            .await;

        let ack = api(&server).submit(&m).await.unwrap();
        assert_eq!(ack.version, 4);
        assert_eq!(ack.data, Some(json!({"name": "Camp B"})));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_no_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/sync/entity/e1")
            .with_status(204)
            .create_async()
            .await;

        let ack = api(&server).submit(&mutation(MutationAction::Delete, Some(7))).await.unwrap();
        assert_eq!(ack.version, 8);
        assert!(ack.data.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_conflict_carries_server_state() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/sync/entity/e1")
            .with_status(409)
            .with_body(r#"{"serverVersion": 5, "serverData": {"name": "Camp C"}}"#)
            .create_async()
            .await;

        let err = api(&server).submit(&mutation(MutationAction::Create, None)).await.unwrap_err();
        let state = err.server_state().unwrap();
        assert_eq!(state.version, Some(5));
        assert!(!state.deleted);
        assert_eq!(state.data, Some(json!({"name": "Camp C"})));
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("PUT", "/sync/entity/e1").with_status(503).create_async().await;

        let err = api(&server).submit(&mutation(MutationAction::Update, Some(1))).await.unwrap_err();
        assert!(matches!(err, RemoteError::Transient(_)));
    }

    #[tokio::test]
    async fn test_client_errors_are_rejected_and_redacted() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("PUT", "/sync/entity/e1")
            .with_status(422)
            .with_body("contact amina@example.org is invalid")
            .create_async()
            .await;

        let err = api(&server).submit(&mutation(MutationAction::Update, Some(1))).await.unwrap_err();
        match err {
            RemoteError::Rejected { status, message } => {
                assert_eq!(status, 422);
                assert!(!message.contains("amina@example.org"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let api = HttpRemoteApi::new(&RemoteConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
        })
        .unwrap();
        let err = api.submit(&mutation(MutationAction::Update, Some(1))).await.unwrap_err();
        assert!(matches!(err, RemoteError::Transient(_)));
    }
}
