use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use greensight_model::{Batch, KnowledgeBaseEntry, Observation, Progress, StreakState};

/// One consistent view of the current user's data.
///
/// Snapshots are immutable once published; every change produces a new one.
#[derive(Debug, Clone, Default)]
pub struct CacheState {
    /// Newest first by creation time.
    pub batches: Vec<Batch>,
    /// Alphabetical by name.
    pub knowledge_base: Vec<KnowledgeBaseEntry>,
    /// Ids of achievements the user has earned.
    pub earned: BTreeSet<String>,
    pub streak: StreakState,
    /// Server-side observation total at the last load plus local additions since.
    pub observation_counter: u64,
    /// Batches whose observation lists have been fetched.
    pub loaded_observations: HashSet<String>,
    pub is_loading: bool,
    pub last_loaded_at: Option<DateTime<Utc>>,
}

impl CacheState {
    pub fn batch(&self, id: &str) -> Option<&Batch> {
        self.batches.iter().find(|b| b.id == id)
    }

    pub(crate) fn batch_mut(&mut self, id: &str) -> Option<&mut Batch> {
        self.batches.iter_mut().find(|b| b.id == id)
    }

    pub fn entry_by_name(&self, name: &str) -> Option<&KnowledgeBaseEntry> {
        self.knowledge_base.iter().find(|e| e.name == name)
    }

    pub fn observations_loaded(&self, batch_id: &str) -> bool {
        self.loaded_observations.contains(batch_id)
    }

    pub fn observations(&self, batch_id: &str) -> &[Observation] {
        self.batch(batch_id)
            .map(|b| b.observations.as_slice())
            .unwrap_or(&[])
    }

    /// Observations held in memory across all batches.
    pub fn loaded_observation_count(&self) -> u64 {
        self.batches
            .iter()
            .map(|b| b.observations.len() as u64)
            .sum()
    }

    /// Best known total: lazily loaded lists can only undercount.
    pub fn observation_total(&self) -> u64 {
        self.observation_counter.max(self.loaded_observation_count())
    }

    pub fn progress(&self, streak: u32) -> Progress {
        Progress {
            streak,
            observation_count: u32::try_from(self.observation_total()).unwrap_or(u32::MAX),
            batch_count: u32::try_from(self.batches.len()).unwrap_or(u32::MAX),
        }
    }
}
