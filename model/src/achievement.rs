//! Bundled achievement catalog and threshold evaluation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// What an achievement's threshold is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementKind {
    Streak,
    ObservationCount,
    BatchCount,
}

/// Static catalog entry shipped with the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Achievement {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub kind: AchievementKind,
    pub threshold: u32,
}

/// Counters an achievement can be evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub streak: u32,
    pub observation_count: u32,
    pub batch_count: u32,
}

impl Progress {
    pub fn value_for(&self, kind: AchievementKind) -> u32 {
        match kind {
            AchievementKind::Streak => self.streak,
            AchievementKind::ObservationCount => self.observation_count,
            AchievementKind::BatchCount => self.batch_count,
        }
    }
}

impl Achievement {
    pub fn is_met(&self, progress: &Progress) -> bool {
        progress.value_for(self.kind) >= self.threshold
    }
}

pub static CATALOG: &[Achievement] = &[
    Achievement {
        id: "first_batch",
        name: "Green Thumb Initiate",
        description: "Started your first batch!",
        icon: "seed-outline",
        kind: AchievementKind::BatchCount,
        threshold: 1,
    },
    Achievement {
        id: "first_observation",
        name: "First Look",
        description: "Logged your first observation.",
        icon: "eye-check-outline",
        kind: AchievementKind::ObservationCount,
        threshold: 1,
    },
    Achievement {
        id: "streak_3",
        name: "Consistent Grower",
        description: "3-day observation streak!",
        icon: "calendar-check",
        kind: AchievementKind::Streak,
        threshold: 3,
    },
    Achievement {
        id: "streak_7",
        name: "Dedicated Cultivator",
        description: "7-day observation streak!",
        icon: "calendar-star",
        kind: AchievementKind::Streak,
        threshold: 7,
    },
    Achievement {
        id: "streak_14",
        name: "Microgreen Master",
        description: "14-day observation streak!!",
        icon: "trophy-variant-outline",
        kind: AchievementKind::Streak,
        threshold: 14,
    },
    Achievement {
        id: "five_batches",
        name: "Getting Serious",
        description: "Started 5 different batches.",
        icon: "sprout",
        kind: AchievementKind::BatchCount,
        threshold: 5,
    },
    Achievement {
        id: "ten_observations",
        name: "Keen Observer",
        description: "Logged 10 observations in total.",
        icon: "notebook-check-outline",
        kind: AchievementKind::ObservationCount,
        threshold: 10,
    },
];

/// Looks up an achievement in the bundled catalog.
pub fn find(id: &str) -> Option<&'static Achievement> {
    find_in(CATALOG, id)
}

pub fn find_in<'a>(catalog: &'a [Achievement], id: &str) -> Option<&'a Achievement> {
    catalog.iter().find(|a| a.id == id)
}

/// Every achievement in `catalog` that is not in `earned` and whose threshold
/// `progress` meets, in catalog order.
pub fn newly_qualified<'a>(
    catalog: &'a [Achievement],
    earned: &BTreeSet<String>,
    progress: &Progress,
) -> Vec<&'a Achievement> {
    catalog
        .iter()
        .filter(|a| !earned.contains(a.id))
        .filter(|a| a.is_met(progress))
        .collect()
}
