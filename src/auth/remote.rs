//! # Remote Session Lookup
//!
//! Resolves session tokens against a Parse-compatible REST endpoint:
//!
//! ```text
//! GET {server_url}/classes/_Session?where={"sessionToken":"r:abc"}&limit=1
//! X-Parse-Application-Id: <app id>
//! X-Parse-Master-Key: <master key>
//! ```
//!
//! The first result's `user.objectId` is the identity.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::errors::{AuthError, AuthResult};
use super::identity::IdentityResolver;

const X_PARSE_APPLICATION_ID: &str = "X-Parse-Application-Id";
const X_PARSE_MASTER_KEY: &str = "X-Parse-Master-Key";

#[derive(Debug, Deserialize)]
struct SessionQueryResponse {
    #[serde(default)]
    results: Vec<SessionRow>,
}

#[derive(Debug, Deserialize)]
struct SessionRow {
    user: Option<UserPointer>,
}

#[derive(Debug, Deserialize)]
struct UserPointer {
    #[serde(rename = "objectId")]
    object_id: String,
}

/// HTTP-backed [`IdentityResolver`]
pub struct ParseSessionResolver {
    client: Client,
    sessions_url: String,
    app_id: String,
    master_key: Option<String>,
}

impl ParseSessionResolver {
    pub fn new(server_url: &str, app_id: impl Into<String>, master_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            sessions_url: sessions_url(server_url),
            app_id: app_id.into(),
            master_key,
        }
    }

    pub fn sessions_url(&self) -> &str {
        &self.sessions_url
    }
}

fn sessions_url(server_url: &str) -> String {
    format!("{}/classes/_Session", server_url.trim_end_matches('/'))
}

fn identity_from(body: SessionQueryResponse) -> Option<String> {
    body.results
        .into_iter()
        .next()
        .and_then(|row| row.user)
        .map(|user| user.object_id)
}

#[async_trait]
impl IdentityResolver for ParseSessionResolver {
    async fn resolve(&self, session_token: &str) -> AuthResult<Option<String>> {
        let where_clause = serde_json::json!({ "sessionToken": session_token }).to_string();

        let mut request = self
            .client
            .get(&self.sessions_url)
            .query(&[("where", where_clause.as_str()), ("limit", "1")])
            .header(X_PARSE_APPLICATION_ID, &self.app_id);
        if let Some(key) = &self.master_key {
            request = request.header(X_PARSE_MASTER_KEY, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthError::LookupFailed(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "Session service returned an error");
            return Err(AuthError::UnexpectedStatus(status.as_u16()));
        }

        let body: SessionQueryResponse = response
            .json()
            .await
            .map_err(|e| AuthError::LookupFailed(format!("Invalid session response: {}", e)))?;

        let identity = identity_from(body);
        debug!(found = identity.is_some(), "Session lookup finished");
        Ok(identity)
    }
}
