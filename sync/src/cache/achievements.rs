//! Achievement awarding.
//!
//! An achievement is awarded at most once per user. The backend's unique
//! constraint on (user, achievement) is the source of truth; locally, an
//! in-flight set keeps concurrent attempts at the same achievement from
//! issuing duplicate writes while different achievements proceed in parallel.

use std::collections::HashSet;
use std::sync::Mutex;

use futures::future::join_all;
use greensight_gateway::rows::{EarnedAchievementRow, NewEarnedAchievementRow};
use greensight_gateway::{GatewayError, Storage, Tables};
use greensight_model::achievement::{find_in, newly_qualified};
use greensight_model::Achievement;

use super::{lock, DataCache};
use crate::error::CacheError;
use crate::notify::Notice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardOutcome {
    /// Written now for the first time; the user was notified.
    Awarded,
    /// Already recorded locally or on the server.
    AlreadyEarned,
    /// Another award of the same achievement is in progress.
    InFlight,
    /// Not in the bundled catalog, or rejected by the server's catalog.
    UnknownAchievement,
}

/// A catalog entry together with whether the user has earned it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AchievementStatus {
    pub achievement: &'static Achievement,
    pub earned: bool,
}

/// Holds an achievement id in the in-flight set until dropped.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<&'static str>>,
    id: &'static str,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<&'static str>>, id: &'static str) -> Option<Self> {
        // The set lock must be released before a guard exists, since its
        // drop locks the set again.
        let inserted = lock(set).insert(id);
        inserted.then(|| Self { set, id })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(self.id);
    }
}

impl<G> DataCache<G>
where
    G: Tables + Storage + 'static,
{
    /// The whole catalog, flagged with the user's progress.
    pub fn earned_achievements(&self) -> Vec<AchievementStatus> {
        let snapshot = self.snapshot();
        self.options
            .catalog
            .iter()
            .map(|achievement| AchievementStatus {
                achievement,
                earned: snapshot.earned.contains(achievement.id),
            })
            .collect()
    }

    /// Record that the user earned achievement `id`.
    pub async fn award_achievement(&self, id: &str) -> Result<AwardOutcome, CacheError> {
        self.ensure_open()?;
        let Some(achievement) = find_in(self.options.catalog, id) else {
            tracing::warn!(achievement_id = id, "Award requested for unknown achievement");
            return Ok(AwardOutcome::UnknownAchievement);
        };
        if self.snapshot().earned.contains(achievement.id) {
            return Ok(AwardOutcome::AlreadyEarned);
        }
        let Some(_guard) = InFlightGuard::acquire(&self.awards_in_flight, achievement.id) else {
            tracing::debug!(achievement_id = achievement.id, "Award already in flight");
            return Ok(AwardOutcome::InFlight);
        };
        // Another attempt may have finished between the check and the guard.
        if self.snapshot().earned.contains(achievement.id) {
            return Ok(AwardOutcome::AlreadyEarned);
        }

        let row = NewEarnedAchievementRow {
            user_id: self.user_id.clone(),
            achievement_id: achievement.id.to_string(),
        };
        let result = self.gateway.insert::<EarnedAchievementRow>(&row).await;
        self.ensure_open()?;

        match result {
            Ok(_) => {
                self.publish(|s| {
                    s.earned.insert(achievement.id.to_string());
                });
                tracing::info!(
                    user_id = %self.user_id,
                    achievement_id = achievement.id,
                    "Achievement awarded"
                );
                self.notifier.notify(Notice::success(
                    "Achievement Unlocked!",
                    format!("{}: {}", achievement.name, achievement.description),
                ));
                Ok(AwardOutcome::Awarded)
            }
            Err(e) if e.is_unique_violation() => {
                self.publish(|s| {
                    s.earned.insert(achievement.id.to_string());
                });
                tracing::debug!(achievement_id = achievement.id, "Achievement was already earned");
                Ok(AwardOutcome::AlreadyEarned)
            }
            Err(GatewayError::ForeignKeyViolation(message)) => {
                tracing::warn!(
                    achievement_id = achievement.id,
                    %message,
                    "Achievement is not in the server catalog"
                );
                Ok(AwardOutcome::UnknownAchievement)
            }
            Err(e) => Err(self.report(
                "Achievement Error",
                "Could not record achievement",
                CacheError::Gateway(e),
            )),
        }
    }

    /// Award every catalog achievement that `current_streak` and the cached
    /// totals now qualify for. Returns the ids awarded by this call.
    pub async fn check_and_award_achievements(&self, current_streak: u32) -> Vec<&'static str> {
        let snapshot = self.snapshot();
        let progress = snapshot.progress(current_streak);
        let candidates = newly_qualified(self.options.catalog, &snapshot.earned, &progress);
        if candidates.is_empty() {
            return Vec::new();
        }
        tracing::debug!(
            streak = progress.streak,
            observations = progress.observation_count,
            batches = progress.batch_count,
            candidates = candidates.len(),
            "Checking achievements"
        );

        let outcomes = join_all(candidates.iter().map(|a| self.award_achievement(a.id))).await;
        candidates
            .into_iter()
            .zip(outcomes)
            .filter(|(_, outcome)| matches!(outcome, Ok(AwardOutcome::Awarded)))
            .map(|(a, _)| a.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::DateTime;
    use greensight_gateway::mock::{MemoryGateway, MockOp};
    use greensight_gateway::Table;

    use super::*;
    use crate::cache::CacheOptions;
    use crate::clock::FixedClock;
    use crate::notify::{CollectingNotifier, NoticeLevel};

    fn cache(gw: Arc<MemoryGateway>, notifier: Arc<CollectingNotifier>) -> DataCache<MemoryGateway> {
        let clock = Arc::new(FixedClock::new(
            DateTime::parse_from_rfc3339("2026-05-10T09:00:00+02:00").unwrap(),
        ));
        DataCache::new(gw, "u1", notifier, clock, CacheOptions::default())
    }

    #[test]
    fn test_in_flight_guard_is_exclusive_per_id() {
        let set = Mutex::new(HashSet::new());
        let held = InFlightGuard::acquire(&set, "first_batch").unwrap();

        assert!(InFlightGuard::acquire(&set, "first_batch").is_none());
        // A refused acquire leaves the holder's id in place.
        assert!(lock(&set).contains("first_batch"));
        assert!(InFlightGuard::acquire(&set, "streak_3").is_some());

        drop(held);
        assert!(lock(&set).is_empty());
        assert!(InFlightGuard::acquire(&set, "first_batch").is_some());
    }

    #[tokio::test]
    async fn test_award_notifies_once() {
        let gw = Arc::new(MemoryGateway::new());
        let notifier = Arc::new(CollectingNotifier::new());
        let cache = cache(Arc::clone(&gw), Arc::clone(&notifier));

        assert_eq!(
            cache.award_achievement("first_batch").await.unwrap(),
            AwardOutcome::Awarded
        );
        assert_eq!(
            cache.award_achievement("first_batch").await.unwrap(),
            AwardOutcome::AlreadyEarned
        );
        assert_eq!(gw.insert_calls(Table::UserAchievements), 1);
        assert_eq!(notifier.count(NoticeLevel::Success), 1);
        assert_eq!(notifier.notices()[0].title, "Achievement Unlocked!");
    }

    #[tokio::test]
    async fn test_concurrent_awards_of_same_id_write_once() {
        let gw = Arc::new(MemoryGateway::new().with_latency(Duration::from_millis(20)));
        let notifier = Arc::new(CollectingNotifier::new());
        let cache = cache(Arc::clone(&gw), Arc::clone(&notifier));

        let (a, b) = tokio::join!(
            cache.award_achievement("streak_3"),
            cache.award_achievement("streak_3")
        );
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| *o as u8);
        assert_eq!(outcomes, vec![AwardOutcome::Awarded, AwardOutcome::InFlight]);
        assert_eq!(gw.insert_calls(Table::UserAchievements), 1);
        assert_eq!(notifier.count(NoticeLevel::Success), 1);
    }

    #[tokio::test]
    async fn test_server_duplicate_is_silent() {
        let gw = Arc::new(MemoryGateway::new());
        gw.seed(&EarnedAchievementRow {
            user_id: "u1".into(),
            achievement_id: "first_observation".into(),
            earned_at: None,
        });
        let notifier = Arc::new(CollectingNotifier::new());
        let cache = cache(Arc::clone(&gw), Arc::clone(&notifier));

        // The cache has not loaded, so only the backend knows.
        assert_eq!(
            cache.award_achievement("first_observation").await.unwrap(),
            AwardOutcome::AlreadyEarned
        );
        assert!(notifier.notices().is_empty());
        assert!(cache.snapshot().earned.contains("first_observation"));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_awarded() {
        let gw = Arc::new(MemoryGateway::new().with_known_achievements(&["first_batch"]));
        let notifier = Arc::new(CollectingNotifier::new());
        let cache = cache(Arc::clone(&gw), Arc::clone(&notifier));

        assert_eq!(
            cache.award_achievement("no_such_thing").await.unwrap(),
            AwardOutcome::UnknownAchievement
        );
        assert_eq!(gw.insert_calls(Table::UserAchievements), 0);

        assert_eq!(
            cache.award_achievement("streak_7").await.unwrap(),
            AwardOutcome::UnknownAchievement
        );
        assert!(notifier.notices().is_empty());
        assert!(!cache.snapshot().earned.contains("streak_7"));
    }

    #[tokio::test]
    async fn test_write_failure_is_reported_and_retryable() {
        let gw = Arc::new(MemoryGateway::new());
        let notifier = Arc::new(CollectingNotifier::new());
        let cache = cache(Arc::clone(&gw), Arc::clone(&notifier));
        gw.fail_next(
            MockOp::Insert(Table::UserAchievements),
            GatewayError::Api {
                status: 500,
                code: None,
                message: "boom".into(),
            },
        );

        assert!(cache.award_achievement("first_batch").await.is_err());
        assert_eq!(notifier.count(NoticeLevel::Error), 1);
        assert_eq!(
            cache.award_achievement("first_batch").await.unwrap(),
            AwardOutcome::Awarded
        );
    }

    #[tokio::test]
    async fn test_check_awards_every_met_threshold() {
        let gw = Arc::new(MemoryGateway::new());
        let notifier = Arc::new(CollectingNotifier::new());
        let cache = cache(Arc::clone(&gw), Arc::clone(&notifier));

        let mut awarded = cache.check_and_award_achievements(7).await;
        awarded.sort_unstable();
        assert_eq!(awarded, vec!["streak_3", "streak_7"]);

        assert!(cache.check_and_award_achievements(7).await.is_empty());
        assert_eq!(gw.insert_calls(Table::UserAchievements), 2);

        let statuses = cache.earned_achievements();
        assert_eq!(statuses.len(), cache.options.catalog.len());
        let earned: Vec<_> = statuses
            .iter()
            .filter(|s| s.earned)
            .map(|s| s.achievement.id)
            .collect();
        assert_eq!(earned, vec!["streak_3", "streak_7"]);
    }
}
