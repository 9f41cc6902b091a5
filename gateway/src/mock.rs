//! In-memory gateway for testing
//!
//! Tables are held as JSON objects so every [`Record`] type round-trips through
//! the same serde path as the REST client. The backend's uniqueness and
//! foreign-key constraints that the client relies on are enforced and reported
//! with the same Postgres codes the real service uses.

use std::collections::{HashMap, HashSet, VecDeque};
use std::cmp::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::error::{codes, GatewayError, GatewayResult};
use crate::traits::{
    Auth, AuthChange, AuthEvent, Patch, Query, Record, Session, Storage, Table, Tables, User,
};

/// Operations that can be made to fail with [`MemoryGateway::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Select(Table),
    Insert(Table),
    Update(Table),
    Count(Table),
    Upload,
    GetUser,
    SignUp,
    SignIn,
    SignOut,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Select { table: Table, query: Query },
    Insert { table: Table, row: Value },
    Update { table: Table, id: String, patch: Value },
    Count { table: Table, query: Query },
    Upload { bucket: String, path: String, size: usize, content_type: String },
    GetSession,
    GetUser,
    SignUp { email: String },
    SignIn { email: String },
    SignOut,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

struct Account {
    password: String,
    user: User,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<Table, Vec<Map<String, Value>>>,
    read_only: HashSet<Table>,
    known_achievements: Option<HashSet<String>>,
    buckets: HashSet<String>,
    objects: HashMap<(String, String), StoredObject>,
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    session_revoked: bool,
    confirm_email: bool,
    failures: HashMap<MockOp, VecDeque<GatewayError>>,
}

/// Gateway backed by process memory - only compiled in test mode or with mock feature
pub struct MemoryGateway {
    state: Arc<Mutex<MemoryState>>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
    latency: Duration,
    max_object_bytes: usize,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            call_log: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
            max_object_bytes: usize::MAX,
            events,
        }
    }

    /// Delay every operation, so tests can overlap in-flight calls.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Create storage buckets. Uploads to any other bucket fail as not found.
    pub fn with_buckets(self, buckets: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .buckets
            .extend(buckets.iter().map(|b| b.to_string()));
        self
    }

    /// Server-side object size limit.
    pub fn with_max_object_bytes(mut self, max: usize) -> Self {
        self.max_object_bytes = max;
        self
    }

    /// Achievement ids the backend's catalog table knows about. Awards for any
    /// other id fail with a foreign key violation. Unset means all ids are known.
    pub fn with_known_achievements(self, ids: &[&str]) -> Self {
        self.state.lock().unwrap().known_achievements =
            Some(ids.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Reject writes to `table` as a row-level security policy would.
    pub fn with_read_only(self, table: Table) -> Self {
        self.state.lock().unwrap().read_only.insert(table);
        self
    }

    /// Sign-up returns no session until the address is confirmed.
    pub fn with_email_confirmation(self) -> Self {
        self.state.lock().unwrap().confirm_email = true;
        self
    }

    /// Register an account together with its (empty) profile row.
    pub fn register(&self, email: &str, password: &str) -> User {
        let mut state = self.state.lock().unwrap();
        register_account(&mut state, email, password)
    }

    /// Set the locally held session without emitting an event.
    pub fn set_session(&self, session: Option<Session>) {
        let mut state = self.state.lock().unwrap();
        state.session = session;
        state.session_revoked = false;
    }

    /// Invalidate the current session on the server only. `get_session` keeps
    /// returning it, `get_user` fails.
    pub fn revoke_session(&self) {
        self.state.lock().unwrap().session_revoked = true;
    }

    /// Broadcast an auth event to subscribers.
    pub fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    /// Make the next call of `op` fail with `error`. Queued errors are
    /// consumed in order.
    pub fn fail_next(&self, op: MockOp, error: GatewayError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Insert a row as-is, bypassing constraints.
    pub fn seed<R: Record>(&self, row: &R) {
        let value = serde_json::to_value(row).expect("seed row serializes");
        let Value::Object(map) = value else {
            panic!("seed row is not an object");
        };
        self.state
            .lock()
            .unwrap()
            .tables
            .entry(R::TABLE)
            .or_default()
            .push(map);
    }

    /// Current contents of a table, in insertion order.
    pub fn rows<R: Record>(&self) -> Vec<R> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(&R::TABLE)
            .map(|rows| {
                rows.iter()
                    .map(|r| {
                        serde_json::from_value(Value::Object(r.clone())).expect("stored row decodes")
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<StoredObject> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    /// Get recorded calls for verification
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.call_log.lock().unwrap().clone()
    }

    /// Clear call history
    pub fn clear_calls(&self) {
        self.call_log.lock().unwrap().clear()
    }

    /// Number of insert calls made against `table`, successful or not.
    pub fn insert_calls(&self, table: Table) -> usize {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, MockCall::Insert { table: t, .. } if *t == table))
            .count()
    }

    async fn enter(&self, call: MockCall, op: Option<MockOp>) -> GatewayResult<()> {
        self.call_log.lock().unwrap().push(call);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let Some(op) = op else {
            return Ok(());
        };
        match self
            .state
            .lock()
            .unwrap()
            .failures
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn register_account(state: &mut MemoryState, email: &str, password: &str) -> User {
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        email: Some(email.to_string()),
    };
    state.accounts.insert(
        email.to_string(),
        Account {
            password: password.to_string(),
            user: user.clone(),
        },
    );
    let mut profile = Map::new();
    profile.insert("id".into(), Value::String(user.id.clone()));
    profile.insert("username".into(), Value::Null);
    profile.insert("current_streak".into(), Value::from(0));
    state
        .tables
        .entry(Table::Profiles)
        .or_default()
        .push(profile);
    user
}

fn new_session(user: User) -> Session {
    Session {
        access_token: format!("token-{}", uuid::Uuid::new_v4()),
        refresh_token: None,
        expires_at: Some(Utc::now().timestamp() + 3600),
        user,
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn row_matches(row: &Map<String, Value>, query: &Query) -> bool {
    query.filters.iter().all(|f| {
        row.get(f.column)
            .filter(|v| !v.is_null())
            .is_some_and(|v| text(v) == f.value)
    })
}

/// Postgres ordering: timestamps chronologically, numbers numerically, nulls
/// last when ascending.
fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Some(x), Some(y)) => text(x).cmp(&text(y)),
    }
}

fn unique_violation(constraint: &str) -> GatewayError {
    GatewayError::from_database(
        409,
        Some(codes::UNIQUE_VIOLATION),
        &format!(
            "duplicate key value violates unique constraint \"{}\"",
            constraint
        ),
    )
}

fn foreign_key_violation(constraint: &str, table: Table) -> GatewayError {
    GatewayError::from_database(
        409,
        Some(codes::FOREIGN_KEY_VIOLATION),
        &format!(
            "insert or update on table \"{}\" violates foreign key constraint \"{}\"",
            table.name(),
            constraint
        ),
    )
}

fn rls_violation(table: Table) -> GatewayError {
    GatewayError::from_database(
        403,
        Some(codes::INSUFFICIENT_PRIVILEGE),
        &format!(
            "new row violates row-level security policy for table \"{}\"",
            table.name()
        ),
    )
}

fn to_object<T: serde::Serialize>(value: &T) -> GatewayResult<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(GatewayError::Api {
            status: 400,
            code: None,
            message: format!("expected a JSON object, got {}", other),
        }),
    }
}

fn default_if_missing(row: &mut Map<String, Value>, column: &str, value: Value) {
    if row.get(column).is_none_or(Value::is_null) {
        row.insert(column.to_string(), value);
    }
}

impl MemoryState {
    fn rows(&self, table: Table) -> &[Map<String, Value>] {
        self.tables.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn any_row(&self, table: Table, pred: impl Fn(&Map<String, Value>) -> bool) -> bool {
        self.rows(table).iter().any(pred)
    }

    /// Constraint checks for a row about to be stored. `except_id` skips the
    /// row being updated.
    fn check_constraints(
        &self,
        table: Table,
        row: &Map<String, Value>,
        except_id: Option<&str>,
    ) -> GatewayResult<()> {
        let other = |r: &Map<String, Value>| {
            except_id.is_none_or(|id| r.get("id").map(text).as_deref() != Some(id))
        };
        let same = |r: &Map<String, Value>, column: &str| match (r.get(column), row.get(column)) {
            (Some(a), Some(b)) if !a.is_null() && !b.is_null() => text(a) == text(b),
            _ => false,
        };

        match table {
            Table::KnowledgeBase => {
                if self.any_row(table, |r| other(r) && same(r, "name")) {
                    return Err(unique_violation("knowledge_base_name_key"));
                }
            }
            Table::Profiles => {
                if self.any_row(table, |r| other(r) && same(r, "username")) {
                    return Err(unique_violation("profiles_username_key"));
                }
            }
            Table::UserAchievements => {
                if self.any_row(table, |r| same(r, "user_id") && same(r, "achievement_id")) {
                    return Err(unique_violation(
                        "user_achievements_user_id_achievement_id_key",
                    ));
                }
                if let Some(known) = &self.known_achievements {
                    let id = row.get("achievement_id").map(text).unwrap_or_default();
                    if !known.contains(&id) {
                        return Err(foreign_key_violation(
                            "user_achievements_achievement_id_fkey",
                            table,
                        ));
                    }
                }
            }
            Table::Observations => {
                let batch_id = row.get("batch_id").map(text).unwrap_or_default();
                let batch_exists = self.any_row(Table::Batches, |r| {
                    r.get("id").map(text).as_deref() == Some(batch_id.as_str())
                });
                if !batch_exists {
                    return Err(foreign_key_violation("observations_batch_id_fkey", table));
                }
            }
            Table::Batches => {}
        }
        Ok(())
    }
}

impl Tables for MemoryGateway {
    async fn select<R: Record>(&self, query: &Query) -> GatewayResult<Vec<R>> {
        self.enter(
            MockCall::Select {
                table: R::TABLE,
                query: query.clone(),
            },
            Some(MockOp::Select(R::TABLE)),
        )
        .await?;

        let mut rows: Vec<Map<String, Value>> = {
            let state = self.state.lock().unwrap();
            state
                .rows(R::TABLE)
                .iter()
                .filter(|r| row_matches(r, query))
                .cloned()
                .collect()
        };
        if let Some(order) = query.order {
            rows.sort_by(|a, b| {
                let ord = compare(a.get(order.column), b.get(order.column));
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        rows.into_iter()
            .map(|r| serde_json::from_value::<R>(Value::Object(r)).map_err(GatewayError::from))
            .collect()
    }

    async fn insert<R: Record>(&self, row: &R::Insert) -> GatewayResult<R> {
        let mut map = to_object(row)?;
        self.enter(
            MockCall::Insert {
                table: R::TABLE,
                row: Value::Object(map.clone()),
            },
            Some(MockOp::Insert(R::TABLE)),
        )
        .await?;

        let now = Value::String(Utc::now().to_rfc3339());
        match R::TABLE {
            Table::UserAchievements => default_if_missing(&mut map, "earned_at", now),
            Table::Profiles => default_if_missing(&mut map, "updated_at", now),
            Table::Observations => {
                default_if_missing(&mut map, "id", Value::String(uuid::Uuid::new_v4().to_string()));
                default_if_missing(&mut map, "observation_date", now.clone());
                default_if_missing(&mut map, "created_at", now);
            }
            Table::Batches | Table::KnowledgeBase => {
                default_if_missing(&mut map, "id", Value::String(uuid::Uuid::new_v4().to_string()));
                default_if_missing(&mut map, "created_at", now);
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            if state.read_only.contains(&R::TABLE) {
                return Err(rls_violation(R::TABLE));
            }
            state.check_constraints(R::TABLE, &map, None)?;
            state.tables.entry(R::TABLE).or_default().push(map.clone());
        }
        tracing::debug!(table = R::TABLE.name(), "Memory insert");
        Ok(serde_json::from_value(Value::Object(map))?)
    }

    async fn update<P: Patch>(&self, id: &str, patch: &P) -> GatewayResult<()> {
        let patch = to_object(patch)?;
        self.enter(
            MockCall::Update {
                table: P::TABLE,
                id: id.to_string(),
                patch: Value::Object(patch.clone()),
            },
            Some(MockOp::Update(P::TABLE)),
        )
        .await?;

        let mut state = self.state.lock().unwrap();
        if state.read_only.contains(&P::TABLE) {
            return Err(rls_violation(P::TABLE));
        }
        let Some(pos) = state
            .rows(P::TABLE)
            .iter()
            .position(|r| r.get("id").map(text).as_deref() == Some(id))
        else {
            // An update that matches nothing is not an error for the table API.
            return Ok(());
        };
        let mut merged = state.rows(P::TABLE)[pos].clone();
        merged.extend(patch);
        state.check_constraints(P::TABLE, &merged, Some(id))?;
        if let Some(rows) = state.tables.get_mut(&P::TABLE) {
            rows[pos] = merged;
        }
        Ok(())
    }

    async fn count(&self, table: Table, query: &Query) -> GatewayResult<u64> {
        self.enter(
            MockCall::Count {
                table,
                query: query.clone(),
            },
            Some(MockOp::Count(table)),
        )
        .await?;

        let state = self.state.lock().unwrap();
        Ok(state.rows(table).iter().filter(|r| row_matches(r, query)).count() as u64)
    }
}

#[async_trait]
impl Auth for MemoryGateway {
    async fn get_session(&self) -> GatewayResult<Option<Session>> {
        self.enter(MockCall::GetSession, None).await?;
        Ok(self.state.lock().unwrap().session.clone())
    }

    async fn get_user(&self) -> GatewayResult<User> {
        self.enter(MockCall::GetUser, Some(MockOp::GetUser)).await?;
        let state = self.state.lock().unwrap();
        match &state.session {
            Some(s) if !state.session_revoked => Ok(s.user.clone()),
            _ => Err(GatewayError::Unauthenticated),
        }
    }

    async fn sign_up(&self, email: &str, password: &str) -> GatewayResult<Option<Session>> {
        self.enter(
            MockCall::SignUp {
                email: email.to_string(),
            },
            Some(MockOp::SignUp),
        )
        .await?;

        let session = {
            let mut state = self.state.lock().unwrap();
            if state.accounts.contains_key(email) {
                return Err(GatewayError::Api {
                    status: 422,
                    code: None,
                    message: "User already registered".into(),
                });
            }
            let user = register_account(&mut state, email, password);
            if state.confirm_email {
                None
            } else {
                let session = new_session(user);
                state.session = Some(session.clone());
                state.session_revoked = false;
                Some(session)
            }
        };
        if let Some(ref s) = session {
            self.emit(AuthEvent {
                change: AuthChange::SignedIn,
                session: Some(s.clone()),
            });
        }
        Ok(session)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> GatewayResult<Session> {
        self.enter(
            MockCall::SignIn {
                email: email.to_string(),
            },
            Some(MockOp::SignIn),
        )
        .await?;

        let session = {
            let mut state = self.state.lock().unwrap();
            let user = match state.accounts.get(email) {
                Some(account) if account.password == password => account.user.clone(),
                _ => {
                    return Err(GatewayError::Api {
                        status: 400,
                        code: None,
                        message: "Invalid login credentials".into(),
                    })
                }
            };
            let session = new_session(user);
            state.session = Some(session.clone());
            state.session_revoked = false;
            session
        };
        self.emit(AuthEvent {
            change: AuthChange::SignedIn,
            session: Some(session.clone()),
        });
        Ok(session)
    }

    async fn sign_out(&self) -> GatewayResult<()> {
        self.enter(MockCall::SignOut, Some(MockOp::SignOut)).await?;
        self.state.lock().unwrap().session = None;
        self.emit(AuthEvent {
            change: AuthChange::SignedOut,
            session: None,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl Storage for MemoryGateway {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> GatewayResult<String> {
        self.enter(
            MockCall::Upload {
                bucket: bucket.to_string(),
                path: path.to_string(),
                size: bytes.len(),
                content_type: content_type.to_string(),
            },
            Some(MockOp::Upload),
        )
        .await?;

        let mut state = self.state.lock().unwrap();
        if !state.buckets.contains(bucket) {
            return Err(GatewayError::Storage {
                status: 404,
                message: "Bucket not found".into(),
            });
        }
        if bytes.len() > self.max_object_bytes {
            return Err(GatewayError::Storage {
                status: 413,
                message: "The object exceeded the maximum allowed size".into(),
            });
        }
        let key = (bucket.to_string(), path.to_string());
        if state.objects.contains_key(&key) {
            return Err(GatewayError::Storage {
                status: 409,
                message: "The resource already exists".into(),
            });
        }
        state.objects.insert(
            key,
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(path.to_string())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://storage/{}/{}", bucket, path)
    }
}
