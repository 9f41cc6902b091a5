//! HTTP implementation of the gateway traits
//!
//! Talks to a hosted backend-as-a-service exposing PostgREST-style table
//! endpoints under `/rest/v1`, password auth under `/auth/v1` and object
//! storage under `/storage/v1`. Requests carry the project's anonymous key
//! and, once signed in, the session's bearer token so the backend's row-level
//! policies apply.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::error::{GatewayError, GatewayResult};
use crate::traits::{
    Auth, AuthChange, AuthEvent, Patch, Query, Record, Session, Storage, Table, Tables, User,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const AUTH_EVENT_CAPACITY: usize = 16;

/// Network client for the hosted backend.
pub struct RestGateway {
    http: Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

/// Error body returned by the table API.
#[derive(Debug, Deserialize)]
struct DatabaseErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

/// Error body returned by the auth API. Field names vary between versions.
#[derive(Debug, Deserialize)]
struct AuthErrorBody {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

/// Error body returned by the storage API.
#[derive(Debug, Deserialize)]
struct StorageErrorBody {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    user: Option<User>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(rename = "Key")]
    key: Option<String>,
}

impl RestGateway {
    /// Create a client for the backend at `base_url`.
    pub fn new(base_url: &str, anon_key: &str) -> GatewayResult<Self> {
        Self::with_timeout(base_url, anon_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, anon_key: &str, timeout: Duration) -> GatewayResult<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(GatewayError::InvalidConfig("gateway URL is empty".into()));
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(GatewayError::InvalidConfig(format!(
                "gateway URL must be http(s): {}",
                base_url
            )));
        }
        if anon_key.trim().is_empty() {
            return Err(GatewayError::InvalidConfig("anonymous key is empty".into()));
        }

        let http = Client::builder().timeout(timeout).build()?;
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Ok(Self {
            http,
            base_url: base_url.to_string(),
            anon_key: anon_key.to_string(),
            session: RwLock::new(None),
            events,
        })
    }

    /// Restore a session persisted by the host, e.g. from secure storage.
    pub fn restore_session(&self, session: Session) {
        self.set_session(Some(session.clone()));
        let _ = self.events.send(AuthEvent {
            change: AuthChange::InitialSession,
            session: Some(session),
        });
    }

    fn current_session(&self) -> Option<Session> {
        self.session
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn set_session(&self, session: Option<Session>) {
        match self.session.write() {
            Ok(mut guard) => *guard = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
    }

    fn emit(&self, change: AuthChange, session: Option<Session>) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(AuthEvent { change, session });
    }

    fn bearer(&self) -> String {
        self.current_session()
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.anon_key.clone())
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.name())
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path)
    }

    fn session_from_token(token: TokenResponse) -> GatewayResult<Option<Session>> {
        let Some(access_token) = token.access_token else {
            return Ok(None);
        };
        let user = token
            .user
            .ok_or_else(|| GatewayError::InvalidConfig("token response without user".into()))?;
        Ok(Some(Session {
            access_token,
            refresh_token: token.refresh_token,
            expires_at: token.expires_in.map(|s| Utc::now().timestamp() + s),
            user,
        }))
    }
}

/// Query-string parameters for a table request.
fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    for f in &query.filters {
        params.push((f.column.to_string(), format!("eq.{}", f.value)));
    }
    if let Some(order) = query.order {
        let dir = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{}", order.column, dir)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

/// Total from a `Content-Range` header such as `0-24/3573` or `*/0`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

async fn decode<T: DeserializeOwned>(resp: Response) -> GatewayResult<T> {
    let body = resp.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

async fn check_database(resp: Response) -> GatewayResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<DatabaseErrorBody>(&text) {
        Ok(body) => {
            let message = match (body.message, body.details) {
                (Some(m), Some(d)) => format!("{} ({})", m, d),
                (Some(m), None) => m,
                (None, Some(d)) => d,
                (None, None) => text.clone(),
            };
            (body.code, message)
        }
        Err(_) => (None, text),
    };
    Err(GatewayError::from_database(
        status.as_u16(),
        code.as_deref(),
        &message,
    ))
}

async fn check_auth(resp: Response) -> GatewayResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(GatewayError::Unauthenticated);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<AuthErrorBody>(&text)
        .ok()
        .and_then(|b| b.error_description.or(b.msg).or(b.message).or(b.error))
        .unwrap_or(text);
    Err(GatewayError::Api {
        status: status.as_u16(),
        code: None,
        message,
    })
}

async fn check_storage(resp: Response) -> GatewayResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<StorageErrorBody>(&text) {
        Ok(StorageErrorBody {
            error: Some(e),
            message: Some(m),
        }) if e != m => format!("{}: {}", e, m),
        Ok(body) => body.message.or(body.error).unwrap_or(text),
        Err(_) => text,
    };
    Err(GatewayError::Storage {
        status: status.as_u16(),
        message,
    })
}

impl Tables for RestGateway {
    async fn select<R: Record>(&self, query: &Query) -> GatewayResult<Vec<R>> {
        let req = self
            .http
            .get(self.table_url(R::TABLE))
            .query(&query_params(query));
        let resp = self.authorized(req).send().await?;
        let resp = check_database(resp).await?;
        decode(resp).await
    }

    async fn insert<R: Record>(&self, row: &R::Insert) -> GatewayResult<R> {
        let req = self
            .http
            .post(self.table_url(R::TABLE))
            .header("Prefer", "return=representation")
            .json(row);
        let resp = self.authorized(req).send().await?;
        let resp = check_database(resp).await?;
        let mut rows: Vec<R> = decode(resp).await?;
        if rows.is_empty() {
            return Err(GatewayError::NotFound(format!(
                "insert into {} returned no row",
                R::TABLE.name()
            )));
        }
        Ok(rows.swap_remove(0))
    }

    async fn update<P: Patch>(&self, id: &str, patch: &P) -> GatewayResult<()> {
        let req = self
            .http
            .patch(self.table_url(P::TABLE))
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=minimal")
            .json(patch);
        let resp = self.authorized(req).send().await?;
        check_database(resp).await?;
        Ok(())
    }

    async fn count(&self, table: Table, query: &Query) -> GatewayResult<u64> {
        let mut params = query_params(&Query {
            filters: query.filters.clone(),
            order: None,
            limit: None,
        });
        params[0].1 = "id".to_string();
        let req = self
            .http
            .head(self.table_url(table))
            .query(&params)
            .header("Prefer", "count=exact");
        let resp = self.authorized(req).send().await?;
        let resp = check_database(resp).await?;
        resp.headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| GatewayError::Api {
                status: resp.status().as_u16(),
                code: None,
                message: "count response without Content-Range total".into(),
            })
    }
}

#[async_trait]
impl Auth for RestGateway {
    async fn get_session(&self) -> GatewayResult<Option<Session>> {
        Ok(self.current_session())
    }

    async fn get_user(&self) -> GatewayResult<User> {
        if self.current_session().is_none() {
            return Err(GatewayError::Unauthenticated);
        }
        let req = self.http.get(self.auth_url("user"));
        let resp = self.authorized(req).send().await?;
        let resp = check_auth(resp).await?;
        decode(resp).await
    }

    async fn sign_up(&self, email: &str, password: &str) -> GatewayResult<Option<Session>> {
        let req = self
            .http
            .post(self.auth_url("signup"))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }));
        let resp = check_auth(req.send().await?).await?;
        let token: TokenResponse = decode(resp).await?;
        let session = Self::session_from_token(token)?;
        if let Some(ref s) = session {
            self.set_session(Some(s.clone()));
            tracing::info!(user_id = %s.user.id, "Signed up and signed in");
            self.emit(AuthChange::SignedIn, Some(s.clone()));
        } else {
            tracing::info!("Signed up; account awaits confirmation");
        }
        Ok(session)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> GatewayResult<Session> {
        let req = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }));
        let resp = check_auth(req.send().await?).await?;
        let token: TokenResponse = decode(resp).await?;
        let session = Self::session_from_token(token)?.ok_or(GatewayError::Unauthenticated)?;
        self.set_session(Some(session.clone()));
        tracing::info!(user_id = %session.user.id, "Signed in");
        self.emit(AuthChange::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> GatewayResult<()> {
        let result = if self.current_session().is_some() {
            let req = self.http.post(self.auth_url("logout"));
            match self.authorized(req).send().await {
                Ok(resp) => check_auth(resp).await.map(|_| ()),
                Err(e) => Err(e.into()),
            }
        } else {
            Ok(())
        };
        // The local session is dropped even if the server call failed.
        self.set_session(None);
        self.emit(AuthChange::SignedOut, None);
        match result {
            Err(GatewayError::Unauthenticated) => Ok(()),
            other => other,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl Storage for RestGateway {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> GatewayResult<String> {
        let req = self
            .http
            .post(self.object_url(bucket, path))
            .header("content-type", content_type)
            .header("x-upsert", "false")
            .body(bytes);
        let resp = self.authorized(req).send().await?;
        let resp = check_storage(resp).await?;
        let body: UploadResponse = decode(resp).await?;
        // The key is prefixed with the bucket name; callers want the path.
        let stored = body
            .key
            .and_then(|k| k.strip_prefix(&format!("{}/", bucket)).map(str::to_string))
            .unwrap_or_else(|| path.to_string());
        Ok(stored)
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, bucket, path
        )
    }
}
