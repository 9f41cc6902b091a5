//! Gateway trait abstraction over the hosted backend
//!
//! The backend exposes three surfaces: relational tables, password
//! authentication and object storage. Each surface is its own trait so that
//! consumers only ask for what they use. [`Gateway`] bundles all three.
//!
//! `Tables` uses generic methods and returns `impl Future + Send` so callers
//! can spawn the futures; it is used through static dispatch. `Auth` and
//! `Storage` are object safe.

use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::GatewayResult;

/// Tables the client reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Batches,
    Observations,
    KnowledgeBase,
    Profiles,
    UserAchievements,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Self::Batches => "batches",
            Self::Observations => "observations",
            Self::KnowledgeBase => "knowledge_base",
            Self::Profiles => "profiles",
            Self::UserAchievements => "user_achievements",
        }
    }
}

/// A row type bound to its table, together with the shape used to insert it.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: Table;
    type Insert: Serialize + Send + Sync;
}

/// A partial update for rows of one table, addressed by `id`.
pub trait Patch: Serialize + Send + Sync {
    const TABLE: Table;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub column: &'static str,
    pub ascending: bool,
}

/// Equality filters plus an optional ordering and limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<String>) -> Self {
        self.filters.push(Filter {
            column,
            value: value.into(),
        });
        self
    }

    pub fn ascending(mut self, column: &'static str) -> Self {
        self.order = Some(Order {
            column,
            ascending: true,
        });
        self
    }

    pub fn descending(mut self, column: &'static str) -> Self {
        self.order = Some(Order {
            column,
            ascending: false,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Typed access to the backend's relational tables.
pub trait Tables: Send + Sync {
    /// Rows matching `query`.
    fn select<R: Record>(
        &self,
        query: &Query,
    ) -> impl Future<Output = GatewayResult<Vec<R>>> + Send;

    /// Insert one row and return it as stored, with generated id and timestamps.
    fn insert<R: Record>(
        &self,
        row: &R::Insert,
    ) -> impl Future<Output = GatewayResult<R>> + Send;

    /// Apply `patch` to the row whose `id` matches.
    fn update<P: Patch>(
        &self,
        id: &str,
        patch: &P,
    ) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Number of rows in `table` matching `query`'s filters.
    fn count(
        &self,
        table: Table,
        query: &Query,
    ) -> impl Future<Output = GatewayResult<u64>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds.
    pub expires_at: Option<i64>,
    pub user: User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthChange {
    InitialSession,
    SignedIn,
    SignedOut,
    UserUpdated,
    TokenRefreshed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    pub change: AuthChange,
    pub session: Option<Session>,
}

/// Password authentication and session state.
#[async_trait]
pub trait Auth: Send + Sync {
    /// Locally held session, without contacting the server.
    async fn get_session(&self) -> GatewayResult<Option<Session>>;

    /// The user behind the current session, validated by the server.
    async fn get_user(&self) -> GatewayResult<User>;

    /// Returns the new session, or `None` when the account awaits confirmation.
    async fn sign_up(&self, email: &str, password: &str) -> GatewayResult<Option<Session>>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> GatewayResult<Session>;

    async fn sign_out(&self) -> GatewayResult<()>;

    /// Stream of auth state changes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Object storage for images.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store `bytes` at `path` inside `bucket`. Returns the stored path.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> GatewayResult<String>;

    /// Stable public URL for an uploaded object.
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

/// Everything the client needs from the backend.
pub trait Gateway: Tables + Auth + Storage {}

impl<T: Tables + Auth + Storage> Gateway for T {}
