//! Conversion between backend rows and domain entities.
//!
//! Every column is mapped explicitly in both directions so that a renamed or
//! retyped column fails to compile here instead of silently defaulting.
//! Absent list columns become empty lists; empty lists are written as `NULL`.

use chrono::{DateTime, Utc};
use greensight_gateway::rows::{
    BatchRow, KnowledgeBaseRow, NewBatchRow, NewKnowledgeBaseRow, NewObservationRow,
    ObservationRow, ProfileRow, ProfileStreakPatch,
};
use greensight_model::observation::sort_newest_first;
use greensight_model::validation::non_blank;
use greensight_model::{
    Batch, Difficulty, EventTag, KnowledgeBaseEntry, NewBatch, NewKnowledgeBaseEntry,
    NewObservation, Observation, Profile, StreakState, TagSet, UnknownDifficulty,
};

fn day_count_from_column(value: Option<i32>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok()).filter(|v| *v > 0)
}

fn day_count_to_column(value: Option<u32>) -> Option<i32> {
    value.map(|v| i32::try_from(v).unwrap_or(i32::MAX))
}

fn list_to_column(list: &[String]) -> Option<Vec<String>> {
    (!list.is_empty()).then(|| list.to_vec())
}

fn trimmed(value: Option<&str>) -> Option<String> {
    non_blank(value).map(|s| s.trim().to_string())
}

pub fn tags_from_column(tags: Option<Vec<String>>) -> TagSet {
    tags.unwrap_or_default()
        .iter()
        .map(|id| EventTag::from(id.as_str()))
        .collect()
}

pub fn observation_from_row(row: ObservationRow) -> Observation {
    Observation {
        id: row.id,
        batch_id: row.batch_id,
        user_id: row.user_id,
        observed_at: row.observation_date,
        notes: row.notes,
        height_cm: row.height,
        phenology_stage: row.phenology_stage,
        photo_url: row.photo_url,
        tags: tags_from_column(row.tags),
        created_at: row.created_at,
    }
}

pub fn observation_to_row(observation: &Observation) -> ObservationRow {
    let tags = observation.tags.to_ids();
    ObservationRow {
        id: observation.id.clone(),
        batch_id: observation.batch_id.clone(),
        user_id: observation.user_id.clone(),
        observation_date: observation.observed_at,
        notes: observation.notes.clone(),
        height: observation.height_cm,
        phenology_stage: observation.phenology_stage.clone(),
        photo_url: observation.photo_url.clone(),
        tags: list_to_column(&tags),
        created_at: observation.created_at,
    }
}

/// Observations in rows are not assumed to be sorted; the result is newest first.
pub fn observations_from_rows(rows: Vec<ObservationRow>) -> Vec<Observation> {
    let mut observations: Vec<Observation> =
        rows.into_iter().map(observation_from_row).collect();
    sort_newest_first(&mut observations);
    observations
}

pub fn batch_from_row(row: BatchRow) -> Batch {
    Batch {
        id: row.id,
        user_id: row.user_id,
        name: row.name,
        sow_date: row.sow_date,
        comments: row.comments.unwrap_or_default(),
        created_at: row.created_at,
        image_url: row.image_url,
        estimated_harvest_days: day_count_from_column(row.estimated_harvest_days),
        observations: observations_from_rows(row.observations.unwrap_or_default()),
    }
}

pub fn batch_to_row(batch: &Batch) -> BatchRow {
    BatchRow {
        id: batch.id.clone(),
        user_id: batch.user_id.clone(),
        name: batch.name.clone(),
        sow_date: batch.sow_date,
        comments: (!batch.comments.is_empty()).then(|| batch.comments.clone()),
        created_at: batch.created_at,
        image_url: batch.image_url.clone(),
        estimated_harvest_days: day_count_to_column(batch.estimated_harvest_days),
        observations: (!batch.observations.is_empty())
            .then(|| batch.observations.iter().map(observation_to_row).collect()),
    }
}

pub fn knowledge_base_entry_from_row(
    row: KnowledgeBaseRow,
) -> Result<KnowledgeBaseEntry, UnknownDifficulty> {
    let difficulty: Difficulty = row.difficulty.parse()?;
    Ok(KnowledgeBaseEntry {
        id: row.id,
        name: row.name,
        description: row.description,
        difficulty,
        min_harvest_days: day_count_from_column(row.min_harvest_days),
        max_harvest_days: day_count_from_column(row.max_harvest_days),
        germination_time: row.germination_time,
        ideal_temp: row.ideal_temp,
        lighting: row.lighting,
        watering: row.watering,
        harvest: row.harvest,
        tips: row.tips.unwrap_or_default(),
        common_problems: row.common_problems.unwrap_or_default(),
        nutritional_info: row.nutritional_info,
        taste_profile: row.taste_profile,
        category: row.category,
        icon_name: row.icon_name,
        image_url: row.image_url,
    })
}

pub fn knowledge_base_entry_to_row(entry: &KnowledgeBaseEntry) -> KnowledgeBaseRow {
    KnowledgeBaseRow {
        id: entry.id.clone(),
        name: entry.name.clone(),
        description: entry.description.clone(),
        difficulty: entry.difficulty.as_str().to_string(),
        min_harvest_days: day_count_to_column(entry.min_harvest_days),
        max_harvest_days: day_count_to_column(entry.max_harvest_days),
        germination_time: entry.germination_time.clone(),
        ideal_temp: entry.ideal_temp.clone(),
        lighting: entry.lighting.clone(),
        watering: entry.watering.clone(),
        harvest: entry.harvest.clone(),
        tips: list_to_column(&entry.tips),
        common_problems: list_to_column(&entry.common_problems),
        nutritional_info: entry.nutritional_info.clone(),
        taste_profile: entry.taste_profile.clone(),
        category: entry.category.clone(),
        icon_name: entry.icon_name.clone(),
        image_url: entry.image_url.clone(),
    }
}

/// Maps knowledge-base rows, dropping rows whose difficulty is not recognized.
pub fn knowledge_base_from_rows(rows: Vec<KnowledgeBaseRow>) -> Vec<KnowledgeBaseEntry> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            match knowledge_base_entry_from_row(row) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(entry_id = %id, error = %e, "Skipping knowledge base row");
                    None
                }
            }
        })
        .collect()
}

pub fn profile_from_row(row: ProfileRow) -> Profile {
    Profile {
        id: row.id,
        username: row.username,
        avatar_url: row.avatar_url,
        streak: StreakState::new(
            row.current_streak
                .and_then(|c| u32::try_from(c).ok())
                .unwrap_or(0),
            row.last_observation_date,
        ),
        updated_at: row.updated_at,
    }
}

pub fn new_batch_row(user_id: &str, input: &NewBatch, image_url: Option<String>) -> NewBatchRow {
    NewBatchRow {
        user_id: user_id.to_string(),
        name: input.name.trim().to_string(),
        sow_date: input.sow_date,
        comments: trimmed(Some(&input.comments)),
        image_url,
        estimated_harvest_days: day_count_to_column(input.estimated_harvest_days),
    }
}

pub fn new_observation_row(
    batch_id: &str,
    user_id: &str,
    input: &NewObservation,
    observed_at: DateTime<Utc>,
    photo_url: Option<String>,
) -> NewObservationRow {
    NewObservationRow {
        batch_id: batch_id.to_string(),
        user_id: user_id.to_string(),
        observation_date: observed_at,
        notes: trimmed(input.notes.as_deref()),
        height: input.height_cm,
        phenology_stage: trimmed(input.phenology_stage.as_deref()),
        photo_url,
        tags: input.tags.to_ids(),
    }
}

pub fn new_knowledge_base_row(
    input: &NewKnowledgeBaseEntry,
    difficulty: Difficulty,
    image_url: Option<String>,
) -> NewKnowledgeBaseRow {
    NewKnowledgeBaseRow {
        name: input.name.trim().to_string(),
        description: input.description.trim().to_string(),
        difficulty: difficulty.as_str().to_string(),
        min_harvest_days: day_count_to_column(input.min_harvest_days),
        max_harvest_days: day_count_to_column(input.max_harvest_days),
        germination_time: trimmed(input.germination_time.as_deref()),
        ideal_temp: trimmed(input.ideal_temp.as_deref()),
        lighting: trimmed(input.lighting.as_deref()),
        watering: trimmed(input.watering.as_deref()),
        harvest: trimmed(input.harvest.as_deref()),
        tips: list_to_column(&input.tips),
        common_problems: list_to_column(&input.common_problems),
        nutritional_info: trimmed(input.nutritional_info.as_deref()),
        taste_profile: trimmed(input.taste_profile.as_deref()),
        category: trimmed(input.category.as_deref()),
        icon_name: trimmed(input.icon_name.as_deref()),
        image_url,
    }
}

pub fn streak_patch(streak: StreakState, updated_at: DateTime<Utc>) -> ProfileStreakPatch {
    ProfileStreakPatch {
        current_streak: i32::try_from(streak.count).unwrap_or(i32::MAX),
        last_observation_date: streak.last_observed_at,
        updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn text() -> impl Strategy<Value = Option<String>> {
        proptest::option::of("[A-Za-z0-9 ,.]{0,24}")
    }

    fn timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (0i64..4_000_000_000, 0u32..1_000_000_000)
            .prop_map(|(s, n)| DateTime::from_timestamp(s, n).unwrap_or_default())
    }

    fn tag() -> impl Strategy<Value = EventTag> {
        prop_oneof![
            Just(EventTag::Watered),
            Just(EventTag::Fertilized),
            Just(EventTag::PestIssue),
            Just(EventTag::Harvested),
            Just(EventTag::Relocated),
            "[a-z]{3,8}_x".prop_map(|s| EventTag::from(s.as_str())),
        ]
    }

    prop_compose! {
        fn observation()(
            id in "[a-z0-9]{8}",
            observed_at in timestamp(),
            notes in text(),
            height_cm in proptest::option::of(0.0f64..500.0),
            phenology_stage in text(),
            photo_url in text(),
            tags in proptest::collection::vec(tag(), 0..6),
            created_at in timestamp(),
        ) -> Observation {
            Observation {
                id,
                batch_id: "b1".into(),
                user_id: "u1".into(),
                observed_at,
                notes,
                height_cm,
                phenology_stage,
                photo_url,
                tags: tags.into_iter().collect(),
                created_at,
            }
        }
    }

    prop_compose! {
        fn batch()(
            name in "[A-Za-z ]{1,20}",
            days in 0i32..3000,
            comments in "[A-Za-z ]{0,30}",
            created_at in timestamp(),
            image_url in text(),
            estimated_harvest_days in proptest::option::of(1u32..365),
            observations in proptest::collection::vec(observation(), 0..5),
        ) -> Batch {
            let mut observations = observations;
            sort_newest_first(&mut observations);
            Batch {
                id: "b1".into(),
                user_id: "u1".into(),
                name,
                sow_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
                    + chrono::Duration::days(days.into()),
                comments,
                created_at,
                image_url,
                estimated_harvest_days,
                observations,
            }
        }
    }

    prop_compose! {
        fn entry()(
            name in "[A-Za-z ]{3,20}",
            description in "[A-Za-z ]{10,40}",
            difficulty in prop_oneof![
                Just(Difficulty::Easy),
                Just(Difficulty::Medium),
                Just(Difficulty::Hard),
            ],
            min_harvest_days in proptest::option::of(1u32..60),
            max_harvest_days in proptest::option::of(1u32..60),
            descriptive in proptest::collection::vec(text(), 10),
            tips in proptest::collection::vec("[a-z ]{1,10}", 0..4),
            common_problems in proptest::collection::vec("[a-z ]{1,10}", 0..4),
        ) -> KnowledgeBaseEntry {
            let mut d = descriptive.into_iter();
            let mut next = || d.next().flatten();
            KnowledgeBaseEntry {
                id: "k1".into(),
                name,
                description,
                difficulty,
                min_harvest_days,
                max_harvest_days,
                germination_time: next(),
                ideal_temp: next(),
                lighting: next(),
                watering: next(),
                harvest: next(),
                tips,
                common_problems,
                nutritional_info: next(),
                taste_profile: next(),
                category: next(),
                icon_name: next(),
                image_url: next(),
            }
        }
    }

    proptest! {
        #[test]
        fn observation_round_trips(o in observation()) {
            prop_assert_eq!(observation_from_row(observation_to_row(&o)), o);
        }

        #[test]
        fn batch_round_trips(b in batch()) {
            prop_assert_eq!(batch_from_row(batch_to_row(&b)), b);
        }

        #[test]
        fn knowledge_base_entry_round_trips(e in entry()) {
            let back = knowledge_base_entry_from_row(knowledge_base_entry_to_row(&e));
            prop_assert_eq!(back, Ok(e));
        }
    }

    fn observation_row(id: &str, at: &str) -> ObservationRow {
        ObservationRow {
            id: id.into(),
            batch_id: "b1".into(),
            user_id: "u1".into(),
            observation_date: at.parse().unwrap(),
            notes: None,
            height: None,
            phenology_stage: None,
            photo_url: None,
            tags: None,
            created_at: at.parse().unwrap(),
        }
    }

    #[test]
    fn test_missing_columns_default() {
        let obs = observation_from_row(observation_row("o1", "2026-05-01T08:00:00Z"));
        assert!(obs.tags.is_empty());
        assert_eq!(obs.height_cm, None);
        assert_eq!(observation_to_row(&obs).tags, None);
    }

    #[test]
    fn test_unknown_tags_survive() {
        let mut row = observation_row("o1", "2026-05-01T08:00:00Z");
        row.tags = Some(vec!["watered".into(), "misted".into()]);
        let obs = observation_from_row(row);
        assert_eq!(obs.tags.renderable().count(), 1);
        assert_eq!(
            observation_to_row(&obs).tags,
            Some(vec!["watered".to_string(), "misted".to_string()])
        );
    }

    #[test]
    fn test_observations_sorted_newest_first() {
        let obs = observations_from_rows(vec![
            observation_row("old", "2026-05-01T08:00:00Z"),
            observation_row("new", "2026-05-03T08:00:00Z"),
            observation_row("mid", "2026-05-02T08:00:00Z"),
        ]);
        let ids: Vec<_> = obs.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_unknown_difficulty_rows_are_skipped() {
        let entry = KnowledgeBaseEntry {
            id: "k1".into(),
            name: "Pea".into(),
            description: "Sweet shoots".into(),
            difficulty: Difficulty::Easy,
            min_harvest_days: None,
            max_harvest_days: None,
            germination_time: None,
            ideal_temp: None,
            lighting: None,
            watering: None,
            harvest: None,
            tips: vec![],
            common_problems: vec![],
            nutritional_info: None,
            taste_profile: None,
            category: None,
            icon_name: None,
            image_url: None,
        };
        let good = knowledge_base_entry_to_row(&entry);
        let mut bad = good.clone();
        bad.difficulty = "easy".into();
        let entries = knowledge_base_from_rows(vec![bad, good]);
        assert_eq!(entries, vec![entry]);
    }

    #[test]
    fn test_insert_rows_are_trimmed() {
        let mut input = NewObservation {
            notes: Some("  sprouting  ".into()),
            phenology_stage: Some("   ".into()),
            ..Default::default()
        };
        input.tags.insert(EventTag::Watered);
        let at = "2026-05-01T08:00:00Z".parse().unwrap();
        let row = new_observation_row("b1", "u1", &input, at, None);
        assert_eq!(row.notes.as_deref(), Some("sprouting"));
        assert_eq!(row.phenology_stage, None);
        assert_eq!(row.tags, vec!["watered".to_string()]);
        assert_eq!(row.observation_date, at);

        let mut batch = NewBatch::new(" Radish ", NaiveDate::from_ymd_opt(2026, 5, 1).unwrap());
        batch.comments = "  ".into();
        let row = new_batch_row("u1", &batch, None);
        assert_eq!(row.name, "Radish");
        assert_eq!(row.comments, None);
    }

    #[test]
    fn test_profile_negative_streak_clamps() {
        let profile = profile_from_row(ProfileRow {
            id: "u1".into(),
            username: Some("grower".into()),
            avatar_url: None,
            current_streak: Some(-3),
            last_observation_date: None,
            updated_at: None,
        });
        assert_eq!(profile.streak.count, 0);
        assert!(profile.is_setup_complete());
    }
}
