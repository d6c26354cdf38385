use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::db::{
    find_achievement_by_key, get_completed_modules, get_unlocked_achievement_ids, get_user,
    record_unlocks,
};
use crate::error::AppError;
use crate::models::Achievement;

pub const FIRST_STEPS: &str = "FIRST_STEPS";
pub const SPEED_LEARNER: &str = "SPEED_LEARNER";
pub const KNOWLEDGE_SEEKER: &str = "KNOWLEDGE_SEEKER";
pub const PROGRAMMING_MASTER: &str = "PROGRAMMING_MASTER";
pub const POINT_COLLECTOR: &str = "POINT_COLLECTOR";

const PROGRAMMING_CATEGORY: &str = "Programming";

// Evaluations for the same user must not interleave: each performs a
// read-evaluate-write cycle with no store-level locking, so two concurrent
// completions could otherwise overwrite each other's unlocks.
static EVAL_LOCKS: Lazy<Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn eval_lock(user_id: i64) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = EVAL_LOCKS.lock().expect("evaluation lock map poisoned");
    locks.entry(user_id).or_default().clone()
}

struct Evaluation {
    unlocked: Vec<i64>,
    newly_unlocked: Vec<i64>,
    points: i64,
}

impl Evaluation {
    /// Unlocks `achievement` when `satisfied` holds and it is not already
    /// held. Missing catalog entries are skipped without complaint.
    fn consider(&mut self, achievement: Option<Achievement>, satisfied: bool) {
        let Some(achievement) = achievement else {
            return;
        };

        if !satisfied || self.unlocked.contains(&achievement.id) {
            return;
        }

        info!(title = %achievement.title, points = achievement.points, "Unlocking achievement");
        self.unlocked.push(achievement.id);
        self.newly_unlocked.push(achievement.id);
        self.points += achievement.points;
    }
}

/// Re-checks every achievement criterion for one user and persists any new
/// unlocks plus the updated point total in a single terminal write.
///
/// Criteria run in a fixed order. The point-collector check reads the point
/// total as updated by earlier unlocks in the same pass, so a pass that
/// pushes the total past its threshold unlocks it immediately.
#[instrument(skip(pool))]
pub async fn award_achievements(pool: &Pool<Sqlite>, user_id: i64) -> Result<(), AppError> {
    let lock = eval_lock(user_id);
    let _serialized = lock.lock().await;

    let user = get_user(pool, user_id).await?;
    let completed = get_completed_modules(pool, user_id).await?;
    let unlocked = get_unlocked_achievement_ids(pool, user_id).await?;

    let completed_count = completed.len() as i64;
    let programming_count = completed
        .iter()
        .filter(|module| module.category == PROGRAMMING_CATEGORY)
        .count() as i64;

    let mut evaluation = Evaluation {
        unlocked,
        newly_unlocked: Vec::new(),
        points: user.points,
    };

    evaluation.consider(
        find_achievement_by_key(pool, FIRST_STEPS).await?,
        completed_count >= 1,
    );
    evaluation.consider(
        find_achievement_by_key(pool, SPEED_LEARNER).await?,
        completed_count >= 5,
    );
    evaluation.consider(
        find_achievement_by_key(pool, KNOWLEDGE_SEEKER).await?,
        completed_count >= 10,
    );
    evaluation.consider(
        find_achievement_by_key(pool, PROGRAMMING_MASTER).await?,
        programming_count >= 3,
    );

    let point_collector = find_achievement_by_key(pool, POINT_COLLECTOR).await?;
    let reached = evaluation.points >= 500;
    evaluation.consider(point_collector, reached);

    if !evaluation.newly_unlocked.is_empty() {
        record_unlocks(pool, user_id, &evaluation.newly_unlocked, evaluation.points).await?;
        info!(
            user_id,
            unlocked = evaluation.newly_unlocked.len(),
            points = evaluation.points,
            "Achievement evaluation complete"
        );
    }

    Ok(())
}
