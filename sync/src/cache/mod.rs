//! Per-user data cache
//!
//! [`DataCache`] holds the signed-in user's batches (with lazily loaded
//! observations), the shared knowledge base, earned achievements and the
//! observation streak. Every mutation performs the remote write first and
//! then publishes a new [`CacheState`] snapshot through a `watch` channel, so
//! readers never see a half-applied change.
//!
//! The cache is the error boundary for remote operations: each public method
//! reports failures to the [`Notifier`] before returning `Err`.

mod achievements;
mod state;

pub use achievements::{AchievementStatus, AwardOutcome};
pub use state::CacheState;

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use greensight_gateway::rows::{
    columns, BatchRow, EarnedAchievementRow, KnowledgeBaseRow, ObservationRow, ProfileRow,
};
use greensight_gateway::{GatewayError, GatewayResult, Query, Storage, Table, Tables};
use greensight_model::observation::sort_newest_first;
use greensight_model::{
    Achievement, Batch, KnowledgeBaseEntry, NewBatch, NewKnowledgeBaseEntry, NewObservation,
    StreakAdvance, StreakState, ValidationErrors, CATALOG,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::CacheError;
use crate::mapper;
use crate::notify::{Notice, Notifier};
use crate::upload::{upload_image, Bucket};

/// Tunables for a [`DataCache`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub max_upload_bytes: u64,
    pub read_retries: u32,
    pub retry_backoff: Duration,
    pub catalog: &'static [Achievement],
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for CacheOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_upload_bytes: config.max_upload_bytes,
            read_retries: config.read_retries,
            retry_backoff: config.retry_backoff,
            catalog: CATALOG,
        }
    }
}

/// Everything fetched by one `load_all`.
struct Fetched {
    knowledge_base: Vec<KnowledgeBaseEntry>,
    batches: Vec<Batch>,
    earned: Vec<String>,
    streak: StreakState,
    observation_count: u64,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cache of one signed-in user's data.
pub struct DataCache<G> {
    gateway: Arc<G>,
    user_id: String,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    options: CacheOptions,
    state: watch::Sender<Arc<CacheState>>,
    awards_in_flight: Mutex<HashSet<&'static str>>,
    profile_sync: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl<G> DataCache<G>
where
    G: Tables + Storage + 'static,
{
    pub fn new(
        gateway: Arc<G>,
        user_id: impl Into<String>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        options: CacheOptions,
    ) -> Self {
        let (state, _) = watch::channel(Arc::new(CacheState::default()));
        Self {
            gateway,
            user_id: user_id.into(),
            notifier,
            clock,
            options,
            state,
            awards_in_flight: Mutex::new(HashSet::new()),
            profile_sync: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<CacheState> {
        Arc::clone(&self.state.borrow())
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<CacheState>> {
        self.state.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn batch(&self, id: &str) -> Option<Batch> {
        self.state.borrow().batch(id).cloned()
    }

    pub fn entry_by_name(&self, name: &str) -> Option<KnowledgeBaseEntry> {
        self.state.borrow().entry_by_name(name).cloned()
    }

    /// Stop the cache. Results of requests still in flight are discarded and
    /// pending background writes are abandoned.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!(user_id = %self.user_id, "Closing data cache");
            self.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the most recent background profile write to finish.
    pub async fn wait_for_profile_sync(&self) {
        let handle = lock(&self.profile_sync).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Profile sync task panicked");
            }
        }
    }

    fn now(&self) -> DateTime<FixedOffset> {
        self.clock.now()
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.cancel.is_cancelled() {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }

    /// Publish a new snapshot derived from the current one. The current
    /// snapshot is cloned first if any reader still holds it.
    fn publish(&self, f: impl FnOnce(&mut CacheState)) {
        self.state
            .send_modify(|current| f(Arc::make_mut(current)));
    }

    fn set_loading(&self, loading: bool) {
        let current = self.state.borrow().is_loading;
        if current != loading {
            self.publish(|s| s.is_loading = loading);
        }
    }

    /// Log `error` and tell the user, then hand it back for returning.
    fn report(&self, title: &str, context: &str, error: CacheError) -> CacheError {
        self.notify_failure(title, context, &error);
        error
    }

    fn notify_failure(&self, title: &str, context: &str, error: &CacheError) {
        match error {
            CacheError::Validation(_) => {
                tracing::debug!(user_id = %self.user_id, error = %error, "{}", context)
            }
            _ => tracing::error!(user_id = %self.user_id, error = %error, "{}", context),
        }
        let message = match error {
            CacheError::Validation(_) | CacheError::DuplicateName(_) => error.to_string(),
            _ => format!("{}: {}", context, error),
        };
        self.notifier.notify(Notice::error(title, message));
    }

    fn write_failure(&self, context: &str, error: GatewayError) -> CacheError {
        let error = match error {
            GatewayError::PermissionDenied(message) => CacheError::PermissionDenied(message),
            other => CacheError::Gateway(other),
        };
        let title = match &error {
            CacheError::PermissionDenied(_) => "Permission Denied",
            _ => "Save Error",
        };
        self.report(title, context, error)
    }

    /// Run an idempotent read, retrying transient failures with exponential backoff.
    async fn read<T, F, Fut>(&self, what: &'static str, mut op: F) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.options.read_retries => {
                    let delay = self
                        .options
                        .retry_backoff
                        .saturating_mul(1u32 << attempt.min(16));
                    tracing::warn!(what, attempt = attempt + 1, error = %e, ?delay, "Read failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_knowledge_base(&self) -> GatewayResult<Vec<KnowledgeBaseEntry>> {
        let query = Query::new().ascending(columns::NAME);
        let q = &query;
        let rows = self
            .read("knowledge base", move || {
                self.gateway.select::<KnowledgeBaseRow>(q)
            })
            .await?;
        Ok(mapper::knowledge_base_from_rows(rows))
    }

    async fn fetch_all(&self) -> GatewayResult<Fetched> {
        // The knowledge base is shared by all users; fetch it before the
        // user's own data so a failure there surfaces first.
        let knowledge_base = self.fetch_knowledge_base().await?;

        let batches_query = Query::new()
            .eq(columns::USER_ID, self.user_id.as_str())
            .descending(columns::CREATED_AT);
        let earned_query = Query::new().eq(columns::USER_ID, self.user_id.as_str());
        let profile_query = Query::new()
            .eq(columns::ID, self.user_id.as_str())
            .limit(1);
        let count_query = Query::new().eq(columns::USER_ID, self.user_id.as_str());
        let (bq, aq, pq, cq) = (&batches_query, &earned_query, &profile_query, &count_query);

        let (batch_rows, earned_rows, profile_rows, observation_count) = tokio::try_join!(
            self.read("batches", move || self.gateway.select::<BatchRow>(bq)),
            self.read("earned achievements", move || {
                self.gateway.select::<EarnedAchievementRow>(aq)
            }),
            self.read("profile", move || self.gateway.select::<ProfileRow>(pq)),
            self.read("observation count", move || {
                self.gateway.count(Table::Observations, cq)
            }),
        )?;

        let streak = profile_rows
            .into_iter()
            .next()
            .map(|row| mapper::profile_from_row(row).streak)
            .unwrap_or_default();

        Ok(Fetched {
            knowledge_base,
            batches: batch_rows.into_iter().map(mapper::batch_from_row).collect(),
            earned: earned_rows.into_iter().map(|r| r.achievement_id).collect(),
            streak,
            observation_count,
        })
    }

    /// Load everything for the user. Prior state stays in place until the
    /// new data has fully arrived, and is left untouched on failure.
    pub async fn load_all(&self) -> Result<(), CacheError> {
        self.ensure_open()?;
        tracing::info!(user_id = %self.user_id, "Loading user data");
        self.set_loading(true);

        let result = self.fetch_all().await;
        if self.cancel.is_cancelled() {
            tracing::debug!(user_id = %self.user_id, "Discarding load result after close");
            self.set_loading(false);
            return Err(CacheError::Closed);
        }

        match result {
            Ok(fetched) => {
                let now = self.now();
                self.publish(|s| {
                    let mut batches = fetched.batches;
                    let mut loaded = HashSet::new();
                    // Keep observation lists already fetched for batches still present.
                    for batch in &mut batches {
                        if s.loaded_observations.contains(&batch.id) {
                            if let Some(prev) = s.batch(&batch.id) {
                                batch.observations = prev.observations.clone();
                                loaded.insert(batch.id.clone());
                            }
                        }
                    }
                    s.batches = batches;
                    s.loaded_observations = loaded;
                    s.knowledge_base = fetched.knowledge_base;
                    s.earned = fetched.earned.into_iter().collect();
                    s.streak = fetched.streak.refreshed(now);
                    s.observation_counter = fetched.observation_count;
                    s.is_loading = false;
                    s.last_loaded_at = Some(now.with_timezone(&Utc));
                });
                let snapshot = self.snapshot();
                tracing::info!(
                    user_id = %self.user_id,
                    batches = snapshot.batches.len(),
                    entries = snapshot.knowledge_base.len(),
                    earned = snapshot.earned.len(),
                    streak = snapshot.streak.count,
                    "User data loaded"
                );
                Ok(())
            }
            Err(e) => {
                self.set_loading(false);
                Err(self.report(
                    "Fetch Error",
                    "Could not load your data",
                    CacheError::Gateway(e),
                ))
            }
        }
    }

    /// Pull-to-refresh: reload without clearing what is shown.
    pub async fn refresh(&self) -> Result<(), CacheError> {
        self.load_all().await
    }

    /// Fetch one batch's observations, newest first. Skipped when already
    /// loaded unless `force` is set.
    pub async fn load_observations(&self, batch_id: &str, force: bool) -> Result<(), CacheError> {
        self.ensure_open()?;
        {
            let snapshot = self.state.borrow();
            if snapshot.batch(batch_id).is_none() {
                drop(snapshot);
                return Err(self.report(
                    "Fetch Error",
                    "Could not load observations",
                    CacheError::BatchNotFound(batch_id.to_string()),
                ));
            }
            if !force && snapshot.observations_loaded(batch_id) {
                return Ok(());
            }
        }

        let query = Query::new()
            .eq(columns::BATCH_ID, batch_id)
            .descending(columns::OBSERVATION_DATE);
        let q = &query;
        let result = self
            .read("observations", move || {
                self.gateway.select::<ObservationRow>(q)
            })
            .await;
        self.ensure_open()?;

        let rows = result.map_err(|e| {
            self.report(
                "Fetch Error",
                "Could not load observations",
                CacheError::Gateway(e),
            )
        })?;
        let observations = mapper::observations_from_rows(rows);
        tracing::debug!(batch_id, count = observations.len(), "Observations loaded");

        self.publish(|s| {
            if let Some(batch) = s.batch_mut(batch_id) {
                batch.observations = observations;
                s.loaded_observations.insert(batch_id.to_string());
            }
        });
        Ok(())
    }

    /// Create a batch and return its id. An image that fails to upload is
    /// dropped with a warning; the batch is still created.
    pub async fn add_batch(&self, input: NewBatch) -> Result<String, CacheError> {
        self.ensure_open()?;
        let now = self.now();
        if let Err(errors) = input.validate(now.date_naive()) {
            return Err(self.report("Validation Error", "Invalid batch", errors.into()));
        }

        let image_url = match &input.image_path {
            Some(path) => {
                upload_image(
                    self.gateway.as_ref(),
                    self.notifier.as_ref(),
                    Bucket::BatchImages,
                    &self.user_id,
                    path,
                    "batch",
                    self.options.max_upload_bytes,
                )
                .await
            }
            None => None,
        };

        let row = mapper::new_batch_row(&self.user_id, &input, image_url);
        let result = self.gateway.insert::<BatchRow>(&row).await;
        self.ensure_open()?;
        let stored = result.map_err(|e| self.write_failure("Failed to add batch", e))?;

        let batch = mapper::batch_from_row(stored);
        let batch_id = batch.id.clone();
        let name = batch.name.clone();
        self.publish(|s| {
            s.loaded_observations.insert(batch.id.clone());
            s.batches.insert(0, batch);
        });
        tracing::info!(user_id = %self.user_id, batch_id = %batch_id, "Batch added");
        self.notifier
            .notify(Notice::success("Batch Added", format!("\"{}\" is growing!", name)));

        let streak = self.snapshot().streak.refreshed(now).count;
        self.check_and_award_achievements(streak).await;
        Ok(batch_id)
    }

    /// Log an observation on a loaded batch and return its id.
    ///
    /// Order: validate, upload, write, splice into the batch, update the
    /// streak (persisted in the background), then check achievements.
    pub async fn add_observation(
        &self,
        batch_id: &str,
        input: NewObservation,
    ) -> Result<String, CacheError> {
        self.ensure_open()?;
        if self.state.borrow().batch(batch_id).is_none() {
            return Err(self.report(
                "Save Error",
                "Failed to add observation",
                CacheError::BatchNotFound(batch_id.to_string()),
            ));
        }
        if let Err(errors) = input.validate() {
            return Err(self.report("Validation Error", "Invalid observation", errors.into()));
        }

        let photo_url = match &input.photo_path {
            Some(path) => {
                upload_image(
                    self.gateway.as_ref(),
                    self.notifier.as_ref(),
                    Bucket::ObservationPhotos,
                    &self.user_id,
                    path,
                    "obs",
                    self.options.max_upload_bytes,
                )
                .await
            }
            None => None,
        };

        let now = self.now();
        let row = mapper::new_observation_row(
            batch_id,
            &self.user_id,
            &input,
            now.with_timezone(&Utc),
            photo_url,
        );
        let result = self.gateway.insert::<ObservationRow>(&row).await;
        self.ensure_open()?;
        let stored = result.map_err(|e| self.write_failure("Failed to add observation", e))?;

        let observation = mapper::observation_from_row(stored);
        let observation_id = observation.id.clone();
        let mut advance = StreakAdvance::Unchanged;
        self.publish(|s| {
            if let Some(batch) = s.batch_mut(batch_id) {
                batch.observations.insert(0, observation);
                sort_newest_first(&mut batch.observations);
            }
            s.observation_counter += 1;
            advance = s.streak.advance(now);
            if let Some(next) = advance.state() {
                s.streak = next;
            }
        });
        tracing::info!(
            user_id = %self.user_id,
            batch_id,
            observation_id = %observation_id,
            "Observation added"
        );

        let streak = match advance.state() {
            Some(next) => {
                tracing::info!(user_id = %self.user_id, streak = next.count, "Streak updated");
                self.spawn_profile_sync(next, now.with_timezone(&Utc));
                next.count
            }
            None => self.snapshot().streak.count,
        };
        self.notifier
            .notify(Notice::success("Observation Saved", "Your observation was logged."));

        self.check_and_award_achievements(streak).await;
        Ok(observation_id)
    }

    /// Write the streak to the profile without blocking the caller. Writes
    /// are chained so they land in order.
    fn spawn_profile_sync(&self, streak: StreakState, at: DateTime<Utc>) {
        let gateway = Arc::clone(&self.gateway);
        let user_id = self.user_id.clone();
        let cancel = self.cancel.clone();
        let patch = mapper::streak_patch(streak, at);

        let mut slot = lock(&self.profile_sync);
        let previous = slot.take();
        *slot = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(user_id = %user_id, "Profile streak write abandoned");
                }
                result = gateway.update(&user_id, &patch) => match result {
                    Ok(()) => tracing::debug!(
                        user_id = %user_id,
                        streak = patch.current_streak,
                        "Profile streak saved"
                    ),
                    Err(e) => tracing::warn!(
                        user_id = %user_id,
                        error = %e,
                        "Failed to save streak to profile"
                    ),
                },
            }
        }));
    }

    /// Add an entry to the shared knowledge base, then re-fetch the list.
    pub async fn add_knowledge_base_entry(
        &self,
        input: NewKnowledgeBaseEntry,
    ) -> Result<String, CacheError> {
        self.ensure_open()?;
        let validated = input.validate().and_then(|()| {
            input.difficulty.ok_or_else(|| {
                let mut errors = ValidationErrors::new();
                errors.push("difficulty", "Please select a difficulty");
                errors
            })
        });
        let difficulty = match validated {
            Ok(d) => d,
            Err(errors) => {
                return Err(self.report("Validation Error", "Invalid entry", errors.into()))
            }
        };

        let image_url = match &input.image_path {
            Some(path) => {
                upload_image(
                    self.gateway.as_ref(),
                    self.notifier.as_ref(),
                    Bucket::KnowledgeBaseImages,
                    &self.user_id,
                    path,
                    "kb",
                    self.options.max_upload_bytes,
                )
                .await
            }
            None => None,
        };

        let row = mapper::new_knowledge_base_row(&input, difficulty, image_url);
        let result = self.gateway.insert::<KnowledgeBaseRow>(&row).await;
        self.ensure_open()?;
        let stored = match result {
            Ok(stored) => stored,
            Err(e) if e.is_unique_violation() => {
                return Err(self.report(
                    "Already Exists",
                    "Failed to add entry",
                    CacheError::DuplicateName(row.name),
                ));
            }
            Err(e) => return Err(self.write_failure("Failed to add entry", e)),
        };
        tracing::info!(entry_id = %stored.id, name = %stored.name, "Knowledge base entry added");
        self.notifier.notify(Notice::success(
            "Entry Added",
            format!("\"{}\" was added to the knowledge base.", stored.name),
        ));

        match self.fetch_knowledge_base().await {
            Ok(entries) if !self.cancel.is_cancelled() => {
                self.publish(|s| s.knowledge_base = entries);
            }
            Ok(_) => {}
            Err(e) => {
                // The entry was saved; only the list is stale.
                self.notify_failure(
                    "Fetch Error",
                    "Could not refresh the knowledge base",
                    &CacheError::Gateway(e),
                );
            }
        }
        Ok(stored.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::notify::{CollectingNotifier, NoticeLevel};
    use chrono::NaiveDate;
    use greensight_gateway::mock::{MemoryGateway, MockOp};

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            DateTime::parse_from_rfc3339("2026-05-10T09:00:00+02:00").unwrap(),
        ))
    }

    fn cache(gw: Arc<MemoryGateway>, notifier: Arc<CollectingNotifier>) -> DataCache<MemoryGateway> {
        let options = CacheOptions {
            retry_backoff: Duration::from_millis(1),
            ..CacheOptions::default()
        };
        DataCache::new(gw, "u1", notifier, clock(), options)
    }

    #[tokio::test]
    async fn test_transient_reads_are_retried() {
        let gw = Arc::new(MemoryGateway::new());
        let notifier = Arc::new(CollectingNotifier::new());
        let cache = cache(Arc::clone(&gw), Arc::clone(&notifier));
        for _ in 0..2 {
            gw.fail_next(
                MockOp::Select(Table::KnowledgeBase),
                GatewayError::Api {
                    status: 503,
                    code: None,
                    message: "unavailable".into(),
                },
            );
        }
        cache.load_all().await.unwrap();
        assert!(notifier.notices().is_empty());
        assert!(!cache.is_loading());
    }

    #[tokio::test]
    async fn test_permanent_read_failure_is_not_retried() {
        let gw = Arc::new(MemoryGateway::new());
        let notifier = Arc::new(CollectingNotifier::new());
        let cache = cache(Arc::clone(&gw), Arc::clone(&notifier));
        gw.fail_next(
            MockOp::Select(Table::KnowledgeBase),
            GatewayError::PermissionDenied("nope".into()),
        );
        assert!(cache.load_all().await.is_err());
        let selects = gw
            .get_calls()
            .iter()
            .filter(|c| matches!(c, greensight_gateway::mock::MockCall::Select { .. }))
            .count();
        assert_eq!(selects, 1);
        assert_eq!(notifier.count(NoticeLevel::Error), 1);
        assert!(!cache.is_loading());
    }

    #[tokio::test]
    async fn test_add_batch_rejects_future_sow_date_before_writing() {
        let gw = Arc::new(MemoryGateway::new());
        let notifier = Arc::new(CollectingNotifier::new());
        let cache = cache(Arc::clone(&gw), Arc::clone(&notifier));

        let input = NewBatch::new("Radish", NaiveDate::from_ymd_opt(2026, 5, 11).unwrap());
        let err = cache.add_batch(input).await.unwrap_err();
        assert!(matches!(err, CacheError::Validation(_)));
        assert_eq!(gw.insert_calls(Table::Batches), 0);
        assert_eq!(notifier.count(NoticeLevel::Error), 1);
    }

    #[tokio::test]
    async fn test_observation_on_unknown_batch_is_rejected() {
        let gw = Arc::new(MemoryGateway::new());
        let notifier = Arc::new(CollectingNotifier::new());
        let cache = cache(Arc::clone(&gw), notifier);
        let input = NewObservation {
            notes: Some("hello".into()),
            ..Default::default()
        };
        assert!(matches!(
            cache.add_observation("missing", input).await,
            Err(CacheError::BatchNotFound(_))
        ));
        assert_eq!(gw.insert_calls(Table::Observations), 0);
    }

    #[tokio::test]
    async fn test_closed_cache_refuses_work() {
        let gw = Arc::new(MemoryGateway::new());
        let notifier = Arc::new(CollectingNotifier::new());
        let cache = cache(Arc::clone(&gw), Arc::clone(&notifier));
        cache.close();
        assert!(matches!(cache.load_all().await, Err(CacheError::Closed)));
        assert!(gw.get_calls().is_empty());
        assert!(notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_snapshots_are_copy_on_write() {
        let gw = Arc::new(MemoryGateway::new());
        let notifier = Arc::new(CollectingNotifier::new());
        let cache = cache(Arc::clone(&gw), notifier);
        let before = cache.snapshot();

        cache
            .add_batch(NewBatch::new(
                "Radish",
                NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
            ))
            .await
            .unwrap();

        assert!(before.batches.is_empty());
        assert_eq!(cache.snapshot().batches.len(), 1);
    }
}
