//! Hosted backend over REST.
//!
//! Auth goes through the identity toolkit (`accounts:*`) and secure token
//! endpoints. Comments and profiles live in the realtime database under
//! `comments/{id}` and `users/{uid}`. The ID token from the most recent
//! sign-in or restoration is attached to every database request.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{Account, AuthBackend, BackendError, CommentBackend, UserDirectory, codes};
use crate::config::{ClientConfig, ConfigError};
use crate::models::{Comment, Credential, Identity, NewComment};

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    id_token: String,
    refresh_token: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    user_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    id_token: &'a str,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Deserialize)]
struct LookupUser {
    #[serde(default)]
    email: Option<String>,
}

/// Comment record as stored in the database (the id is the record key).
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredComment {
    author_user_id: String,
    author_email: String,
    comment: String,
    created_at: i64,
}

#[derive(Deserialize)]
struct Profile {
    #[serde(default)]
    email: Option<String>,
}

/// ETag the realtime database reports for a location that holds no data.
const NULL_ETAG: &str = "null_etag";

/// ID token issued by a sign-up, kept only for that user's profile write.
struct SignUpGrant {
    user_id: String,
    id_token: String,
}

/// REST client for the hosted auth service and realtime database.
///
/// The signed-in user's ID token authorizes every database request. Sign-up
/// never replaces it.
pub struct FirebaseClient {
    http: Client,
    api_key: String,
    auth_url: String,
    token_url: String,
    database_url: String,
    id_token: RwLock<Option<String>>,
    sign_up_grant: Mutex<Option<SignUpGrant>>,
}

impl FirebaseClient {
    /// Builds a client from a validated configuration.
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let api_key = config
            .api_key
            .clone()
            .ok_or(ConfigError::Missing("CORKBOARD_API_KEY"))?;
        let database_url = config
            .database_url
            .clone()
            .ok_or(ConfigError::Missing("CORKBOARD_DATABASE_URL"))?;
        Ok(Self {
            http: Client::new(),
            api_key,
            auth_url: config.auth_url.trim_end_matches('/').to_string(),
            token_url: config.token_url.trim_end_matches('/').to_string(),
            database_url: database_url.trim_end_matches('/').to_string(),
            id_token: RwLock::new(None),
            sign_up_grant: Mutex::new(None),
        })
    }

    fn accounts_endpoint(&self, method: &str) -> String {
        format!("{}/accounts:{method}", self.auth_url)
    }

    fn record_endpoint(&self, path: &str) -> String {
        format!("{}/{path}.json", self.database_url)
    }

    fn current_id_token(&self) -> Option<String> {
        self.id_token.read().ok().and_then(|t| t.clone())
    }

    fn remember_id_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.id_token.write() {
            *slot = token;
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        with_auth(request, self.current_id_token())
    }

    /// Takes the sign-up token if it was issued to `user_id`.
    fn take_sign_up_grant(&self, user_id: &str) -> Option<String> {
        let mut slot = self.sign_up_grant.lock().ok()?;
        match slot.take() {
            Some(grant) if grant.user_id == user_id => Some(grant.id_token),
            other => {
                *slot = other;
                None
            }
        }
    }

    async fn password_flow(
        &self,
        method: &str,
        email: &str,
        password: &str,
    ) -> Result<PasswordResponse, BackendError> {
        let resp = self
            .http
            .post(self.accounts_endpoint(method))
            .query(&[("key", self.api_key.as_str())])
            .json(&PasswordRequest {
                email,
                password,
                return_secure_token: true,
            })
            .send()
            .await?;
        read_json(resp, Service::Identity).await
    }

    async fn lookup_email(&self, id_token: &str) -> Result<Option<String>, BackendError> {
        let resp = self
            .http
            .post(self.accounts_endpoint("lookup"))
            .query(&[("key", self.api_key.as_str())])
            .json(&LookupRequest { id_token })
            .send()
            .await?;
        let body: LookupResponse = read_json(resp, Service::Identity).await?;
        Ok(body.users.into_iter().next().and_then(|u| u.email))
    }
}

#[async_trait]
impl AuthBackend for FirebaseClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, BackendError> {
        let body = self.password_flow("signUp", email, password).await?;
        if let Ok(mut slot) = self.sign_up_grant.lock() {
            *slot = Some(SignUpGrant {
                user_id: body.local_id.clone(),
                id_token: body.id_token,
            });
        }
        Ok(Identity::new(
            body.local_id,
            body.email.unwrap_or_else(|| email.to_string()),
        ))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Credential, BackendError> {
        let body = self.password_flow("signInWithPassword", email, password).await?;
        self.remember_id_token(Some(body.id_token));
        Ok(Credential {
            identity: Identity::new(
                body.local_id,
                body.email.unwrap_or_else(|| email.to_string()),
            ),
            session_token: body.refresh_token,
        })
    }

    async fn sign_out(&self, _session_token: Option<&str>) -> Result<(), BackendError> {
        // Refresh tokens cannot be revoked from a client; dropping the ID
        // token ends this process's access.
        self.remember_id_token(None);
        Ok(())
    }

    async fn current_account(&self, session_token: &str) -> Result<Option<Account>, BackendError> {
        let resp = self
            .http
            .post(format!("{}/token", self.token_url))
            .query(&[("key", self.api_key.as_str())])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", session_token),
            ])
            .send()
            .await?;
        let refreshed: RefreshResponse = match read_json(resp, Service::Identity).await {
            Ok(body) => body,
            Err(e) if is_dead_session(&e) => {
                debug!(code = ?e.code(), "stored session no longer valid");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let email = self.lookup_email(&refreshed.id_token).await?;
        self.remember_id_token(Some(refreshed.id_token));
        Ok(Some(Account {
            user_id: refreshed.user_id,
            email,
        }))
    }
}

#[async_trait]
impl CommentBackend for FirebaseClient {
    async fn fetch_all(&self) -> Result<Vec<Comment>, BackendError> {
        let resp = self
            .authorized(self.http.get(self.record_endpoint("comments")))
            .send()
            .await?;
        let records: Option<HashMap<String, Value>> = read_json(resp, Service::Database).await?;
        Ok(decode_comments(records.unwrap_or_default()))
    }

    /// Create-only write: a retry that finds the record already stored keeps
    /// the original, including its server timestamp.
    async fn put(&self, comment: &NewComment) -> Result<(), BackendError> {
        let path = format!("comments/{}", comment.id);
        let resp = self
            .authorized(self.http.put(self.record_endpoint(&path)))
            .header("if-match", NULL_ETAG)
            .json(&json!({
                "authorUserId": comment.author_user_id,
                "authorEmail": comment.author_email,
                "comment": comment.text,
                "createdAt": { ".sv": "timestamp" },
            }))
            .send()
            .await?;
        if resp.status() == StatusCode::PRECONDITION_FAILED {
            debug!(comment_id = %comment.id, "comment already stored");
            return Ok(());
        }
        read_json::<Value>(resp, Service::Database).await?;
        Ok(())
    }

    async fn patch_text(&self, comment_id: &str, text: &str) -> Result<(), BackendError> {
        let path = format!("comments/{comment_id}");

        // PATCH on a missing key would create a partial record.
        let resp = self
            .authorized(self.http.get(self.record_endpoint(&path)))
            .query(&[("shallow", "true")])
            .send()
            .await?;
        let existing: Value = read_json(resp, Service::Database).await?;
        if existing.is_null() {
            return Err(BackendError::rejected(
                codes::NOT_FOUND,
                format!("no comment with id {comment_id}"),
            ));
        }

        let resp = self
            .authorized(self.http.patch(self.record_endpoint(&path)))
            .json(&json!({ "comment": text }))
            .send()
            .await?;
        read_json::<Value>(resp, Service::Database).await?;
        Ok(())
    }

    async fn remove(&self, comment_id: &str) -> Result<(), BackendError> {
        let path = format!("comments/{comment_id}");
        let resp = self
            .authorized(self.http.delete(self.record_endpoint(&path)))
            .send()
            .await?;
        read_json::<Value>(resp, Service::Database).await?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for FirebaseClient {
    async fn put_profile(&self, user_id: &str, email: &str) -> Result<(), BackendError> {
        let token = self
            .take_sign_up_grant(user_id)
            .or_else(|| self.current_id_token());
        let request = self.http.put(self.record_endpoint(&format!("users/{user_id}")));
        let resp = with_auth(request, token)
            .json(&json!({ "email": email }))
            .send()
            .await?;
        read_json::<Value>(resp, Service::Database).await?;
        Ok(())
    }

    async fn email_for(&self, user_id: &str) -> Result<Option<String>, BackendError> {
        let resp = self
            .authorized(self.http.get(self.record_endpoint(&format!("users/{user_id}"))))
            .send()
            .await?;
        let profile: Option<Profile> = read_json(resp, Service::Database).await?;
        Ok(profile.and_then(|p| p.email))
    }
}

fn with_auth(request: RequestBuilder, id_token: Option<String>) -> RequestBuilder {
    match id_token {
        Some(token) => request.query(&[("auth", token)]),
        None => request,
    }
}

#[derive(Debug, Clone, Copy)]
enum Service {
    Identity,
    Database,
}

async fn read_json<T: DeserializeOwned>(resp: Response, service: Service) -> Result<T, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json::<T>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()));
    }
    let body = resp.text().await.unwrap_or_default();
    Err(rejection(service, status, &body))
}

/// Turns an error response into a rejection with a canonical code.
fn rejection(service: Service, status: StatusCode, body: &str) -> BackendError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let message = parsed["error"]["message"]
        .as_str()
        .or_else(|| parsed["error"].as_str())
        .unwrap_or(body)
        .to_string();

    let code = match service {
        Service::Identity => identity_code(&message),
        Service::Database => database_code(status),
    };
    BackendError::Rejected { code, message }
}

/// Maps identity toolkit error messages (`EMAIL_EXISTS`,
/// `WEAK_PASSWORD : Password should be ...`) to canonical codes.
fn identity_code(message: &str) -> String {
    let head = message.split(" : ").next().unwrap_or(message).trim();
    let canonical = match head {
        "EMAIL_EXISTS" => codes::EMAIL_IN_USE,
        "INVALID_EMAIL" | "MISSING_EMAIL" => codes::INVALID_EMAIL,
        "WEAK_PASSWORD" | "MISSING_PASSWORD" => codes::WEAK_PASSWORD,
        "OPERATION_NOT_ALLOWED" | "PASSWORD_LOGIN_DISABLED" | "ADMIN_ONLY_OPERATION" => {
            codes::OPERATION_NOT_ALLOWED
        }
        "EMAIL_NOT_FOUND" | "USER_NOT_FOUND" => codes::USER_NOT_FOUND,
        "INVALID_PASSWORD" => codes::WRONG_PASSWORD,
        "INVALID_LOGIN_CREDENTIALS" | "INVALID_ID_TOKEN" | "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" => {
            codes::INVALID_CREDENTIAL
        }
        "USER_DISABLED" => codes::USER_DISABLED,
        "TOKEN_EXPIRED" | "INVALID_REFRESH_TOKEN" | "MISSING_REFRESH_TOKEN" => codes::TOKEN_EXPIRED,
        other => return format!("auth/{}", other.to_lowercase().replace('_', "-")),
    };
    canonical.to_string()
}

fn database_code(status: StatusCode) -> String {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => codes::PERMISSION_DENIED.to_string(),
        StatusCode::NOT_FOUND => codes::NOT_FOUND.to_string(),
        other => format!("database/http-{}", other.as_u16()),
    }
}

/// Whether a token exchange failure means the stored session is gone, as
/// opposed to the service being unreachable.
fn is_dead_session(err: &BackendError) -> bool {
    matches!(
        err.code(),
        Some(codes::TOKEN_EXPIRED | codes::USER_NOT_FOUND | codes::USER_DISABLED | codes::INVALID_CREDENTIAL)
    )
}

/// Decodes the `comments` node, skipping records that do not parse.
fn decode_comments(records: HashMap<String, Value>) -> Vec<Comment> {
    records
        .into_iter()
        .filter_map(|(id, value)| {
            let stored: StoredComment = match serde_json::from_value(value) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(comment_id = %id, error = %e, "skipping malformed comment record");
                    return None;
                }
            };
            let Some(created_at) = DateTime::<Utc>::from_timestamp_millis(stored.created_at) else {
                warn!(comment_id = %id, "skipping comment with out-of-range timestamp");
                return None;
            };
            Some(Comment {
                id,
                author_user_id: stored.author_user_id,
                author_email: stored.author_email,
                text: stored.comment,
                created_at,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> FirebaseClient {
        FirebaseClient::new(&ClientConfig {
            api_key: Some("key".into()),
            database_url: Some("https://demo.firebaseio.com/".into()),
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn new_requires_valid_config() {
        assert!(FirebaseClient::new(&ClientConfig::default()).is_err());
    }

    #[test]
    fn endpoints_are_built_from_base_urls() {
        let c = client();
        assert_eq!(
            c.accounts_endpoint("signUp"),
            "https://identitytoolkit.googleapis.com/v1/accounts:signUp"
        );
        assert_eq!(
            c.record_endpoint("comments/abc"),
            "https://demo.firebaseio.com/comments/abc.json"
        );
    }

    #[test]
    fn id_token_is_forgotten_on_sign_out() {
        let c = client();
        c.remember_id_token(Some("tok".into()));
        assert_eq!(c.current_id_token().as_deref(), Some("tok"));
        c.remember_id_token(None);
        assert!(c.current_id_token().is_none());
    }

    #[test]
    fn identity_codes_are_canonicalised() {
        assert_eq!(identity_code("EMAIL_EXISTS"), codes::EMAIL_IN_USE);
        assert_eq!(
            identity_code("WEAK_PASSWORD : Password should be at least 6 characters"),
            codes::WEAK_PASSWORD
        );
        assert_eq!(identity_code("EMAIL_NOT_FOUND"), codes::USER_NOT_FOUND);
        assert_eq!(identity_code("INVALID_PASSWORD"), codes::WRONG_PASSWORD);
        assert_eq!(
            identity_code("INVALID_LOGIN_CREDENTIALS"),
            codes::INVALID_CREDENTIAL
        );
        assert_eq!(identity_code("TOO_MANY_ATTEMPTS_TRY_LATER"), "auth/too-many-attempts-try-later");
    }

    #[test]
    fn rejection_reads_nested_identity_message() {
        let body = r#"{"error":{"code":400,"message":"EMAIL_EXISTS","errors":[]}}"#;
        let err = rejection(Service::Identity, StatusCode::BAD_REQUEST, body);
        assert_eq!(err.code(), Some(codes::EMAIL_IN_USE));
    }

    #[test]
    fn rejection_reads_flat_database_message() {
        let body = r#"{"error":"Permission denied"}"#;
        let err = rejection(Service::Database, StatusCode::UNAUTHORIZED, body);
        assert_eq!(
            err,
            BackendError::rejected(codes::PERMISSION_DENIED, "Permission denied")
        );
    }

    #[test]
    fn dead_session_codes_are_recognised() {
        assert!(is_dead_session(&BackendError::rejected(codes::TOKEN_EXPIRED, "")));
        assert!(!is_dead_session(&BackendError::Transport("down".into())));
    }

    #[test]
    fn decode_comments_skips_malformed_records() {
        let mut records = HashMap::new();
        records.insert(
            "c1".to_string(),
            json!({
                "authorUserId": "u1",
                "authorEmail": "a@x.com",
                "comment": "hello",
                "createdAt": 1_700_000_000_000_i64,
            }),
        );
        records.insert("c2".to_string(), json!({ "comment": "orphan" }));

        let comments = decode_comments(records);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].id, "c1");
        assert_eq!(comments[0].text, "hello");
        assert_eq!(comments[0].created_at.timestamp_millis(), 1_700_000_000_000);
    }
}
