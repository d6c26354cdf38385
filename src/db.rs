use crate::{
    auth::{AuthToken, DbAuthToken, DbUser, User},
    error::AppError,
};
use chrono::{NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::models::{
    Achievement, ChatMessage, ContentBlock, DbAchievement, DbChatMessage, DbLesson, DbLessonBlock,
    DbModule, Lesson, Level, Module,
};

/// Chat messages older than this are expired: invisible to reads and
/// removed by the background sweep.
pub const MESSAGE_TTL_HOURS: i64 = 24;

/// How many messages the chat history endpoint returns.
pub const CHAT_HISTORY_LIMIT: i64 = 50;

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, name, email, role, points FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument]
pub async fn find_user_by_email(
    pool: &Pool<Sqlite>,
    email: &str,
) -> Result<Option<User>, AppError> {
    info!("Fetching user by email");
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, name, email, role, points FROM users WHERE email = ?",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(User::from))
}

#[instrument(skip_all, fields(email, role))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    name: &str,
    email: &str,
    password: &str,
    role: &str,
) -> Result<i64, AppError> {
    info!("Creating new user");

    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Err(AppError::Validation(
            "User with this email already exists".to_string(),
        ));
    }

    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    let res = sqlx::query("INSERT INTO users (name, email, password, role) VALUES (?, ?, ?, ?)")
        .bind(name)
        .bind(email)
        .bind(hashed_password)
        .bind(role)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip_all, fields(email))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let row = sqlx::query_as::<_, DbCredentials>(
        "SELECT id, password FROM users WHERE email = ?",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;

    let Some(credentials) = row else {
        return Ok(None);
    };

    let valid = bcrypt::verify(password, &credentials.password).unwrap_or(false);
    if !valid {
        return Ok(None);
    }

    Ok(Some(get_user(pool, credentials.id).await?))
}

#[derive(sqlx::FromRow)]
struct DbCredentials {
    id: i64,
    password: String,
}

#[instrument(skip(pool, token))]
pub async fn create_auth_token(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating auth token");

    let res = sqlx::query("INSERT INTO auth_tokens (user_id, token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_auth_token(pool: &Pool<Sqlite>, token: &str) -> Result<AuthToken, AppError> {
    info!("Fetching auth token");

    let row = sqlx::query_as::<_, DbAuthToken>(
        "SELECT id, user_id, token, created_at, expires_at FROM auth_tokens WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(token) => Ok(AuthToken::from(token)),
        _ => Err(AppError::Authentication("Invalid auth token".to_string())),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_auth_token(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating auth token");

    sqlx::query("DELETE FROM auth_tokens WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_tokens(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired auth tokens");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM auth_tokens WHERE datetime(expires_at) < datetime(?)")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

#[instrument]
pub async fn get_all_modules(pool: &Pool<Sqlite>) -> Result<Vec<Module>, AppError> {
    info!("Getting all modules");
    let rows = sqlx::query_as::<_, DbModule>("SELECT * FROM modules ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Module::from).collect())
}

#[instrument]
pub async fn get_module(pool: &Pool<Sqlite>, id: i64) -> Result<Module, AppError> {
    info!("Getting module");
    let row = sqlx::query_as::<_, DbModule>("SELECT * FROM modules WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(module) => Ok(Module::from(module)),
        _ => Err(AppError::NotFound(format!("Module {} not found", id))),
    }
}

#[instrument(skip(pool))]
pub async fn create_module(
    pool: &Pool<Sqlite>,
    title: &str,
    description: &str,
    category: &str,
    level: &Level,
    lessons: i64,
) -> Result<i64, AppError> {
    info!("Creating module");
    let res = sqlx::query(
        "INSERT INTO modules (title, description, category, level, lessons) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(title)
    .bind(description)
    .bind(category)
    .bind(level.as_str())
    .bind(lessons)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn update_module(
    pool: &Pool<Sqlite>,
    id: i64,
    title: &str,
    description: &str,
    category: &str,
    level: &Level,
    lessons: i64,
) -> Result<(), AppError> {
    info!("Updating module");
    let now = Utc::now().naive_utc();
    sqlx::query(
        "UPDATE modules
         SET title = ?, description = ?, category = ?, level = ?, lessons = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(title)
    .bind(description)
    .bind(category)
    .bind(level.as_str())
    .bind(lessons)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument]
pub async fn delete_module(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting module");

    sqlx::query(
        "DELETE FROM lesson_blocks WHERE lesson_id IN (SELECT id FROM lessons WHERE module_id = ?)",
    )
    .bind(id)
    .execute(pool)
    .await?;

    sqlx::query("DELETE FROM lessons WHERE module_id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    let result = sqlx::query("DELETE FROM modules WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Module {} not found", id)));
    }

    Ok(())
}

async fn get_blocks_for_lesson(
    pool: &Pool<Sqlite>,
    lesson_id: i64,
) -> Result<Vec<ContentBlock>, AppError> {
    let rows = sqlx::query_as::<_, DbLessonBlock>(
        "SELECT lesson_id, position, kind, value, language FROM lesson_blocks
         WHERE lesson_id = ?
         ORDER BY position",
    )
    .bind(lesson_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ContentBlock::from).collect())
}

async fn insert_lesson_blocks(
    pool: &Pool<Sqlite>,
    lesson_id: i64,
    blocks: &[ContentBlock],
) -> Result<(), AppError> {
    for (position, block) in blocks.iter().enumerate() {
        sqlx::query(
            "INSERT INTO lesson_blocks (lesson_id, position, kind, value, language)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(lesson_id)
        .bind(position as i64)
        .bind(block.kind.as_str())
        .bind(&block.value)
        .bind(&block.language)
        .execute(pool)
        .await?;
    }

    Ok(())
}

#[instrument]
pub async fn get_lessons_by_module(
    pool: &Pool<Sqlite>,
    module_id: i64,
) -> Result<Vec<Lesson>, AppError> {
    info!("Getting lessons for module");
    let rows = sqlx::query_as::<_, DbLesson>(
        "SELECT id, module_id, title, position FROM lessons
         WHERE module_id = ?
         ORDER BY position",
    )
    .bind(module_id)
    .fetch_all(pool)
    .await?;

    let mut lessons = Vec::with_capacity(rows.len());
    for row in rows {
        let mut lesson = Lesson::from(row);
        lesson.content = get_blocks_for_lesson(pool, lesson.id).await?;
        lessons.push(lesson);
    }

    Ok(lessons)
}

#[instrument]
pub async fn get_lesson(pool: &Pool<Sqlite>, id: i64) -> Result<Lesson, AppError> {
    info!("Getting lesson");
    let row = sqlx::query_as::<_, DbLesson>(
        "SELECT id, module_id, title, position FROM lessons WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(lesson) => {
            let mut lesson = Lesson::from(lesson);
            lesson.content = get_blocks_for_lesson(pool, lesson.id).await?;
            Ok(lesson)
        }
        _ => Err(AppError::NotFound(format!("Lesson {} not found", id))),
    }
}

#[instrument(skip(pool, blocks))]
pub async fn create_lesson(
    pool: &Pool<Sqlite>,
    module_id: i64,
    title: &str,
    position: i64,
    blocks: &[ContentBlock],
) -> Result<i64, AppError> {
    info!("Creating lesson");

    let res = sqlx::query("INSERT INTO lessons (module_id, title, position) VALUES (?, ?, ?)")
        .bind(module_id)
        .bind(title)
        .bind(position)
        .execute(pool)
        .await?;

    let lesson_id = res.last_insert_rowid();
    insert_lesson_blocks(pool, lesson_id, blocks).await?;

    Ok(lesson_id)
}

#[instrument(skip(pool, blocks))]
pub async fn update_lesson(
    pool: &Pool<Sqlite>,
    id: i64,
    title: &str,
    position: i64,
    blocks: Option<&[ContentBlock]>,
) -> Result<(), AppError> {
    info!("Updating lesson");

    sqlx::query("UPDATE lessons SET title = ?, position = ? WHERE id = ?")
        .bind(title)
        .bind(position)
        .bind(id)
        .execute(pool)
        .await?;

    if let Some(blocks) = blocks {
        sqlx::query("DELETE FROM lesson_blocks WHERE lesson_id = ?")
            .bind(id)
            .execute(pool)
            .await?;

        insert_lesson_blocks(pool, id, blocks).await?;
    }

    Ok(())
}

#[instrument]
pub async fn delete_lesson(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting lesson");

    sqlx::query("DELETE FROM lesson_blocks WHERE lesson_id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    let result = sqlx::query("DELETE FROM lessons WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Lesson {} not found", id)));
    }

    Ok(())
}

#[instrument]
pub async fn get_all_achievements(pool: &Pool<Sqlite>) -> Result<Vec<Achievement>, AppError> {
    info!("Getting achievement catalog");
    let rows = sqlx::query_as::<_, DbAchievement>("SELECT * FROM achievements ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Achievement::from).collect())
}

#[instrument]
pub async fn find_achievement_by_key(
    pool: &Pool<Sqlite>,
    criteria_key: &str,
) -> Result<Option<Achievement>, AppError> {
    let row =
        sqlx::query_as::<_, DbAchievement>("SELECT * FROM achievements WHERE criteria_key = ?")
            .bind(criteria_key)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(Achievement::from))
}

#[instrument(skip(pool))]
pub async fn create_achievement(
    pool: &Pool<Sqlite>,
    title: &str,
    description: &str,
    points: i64,
    criteria_key: &str,
) -> Result<i64, AppError> {
    info!("Creating achievement");

    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM achievements WHERE title = ? OR criteria_key = ?")
            .bind(title)
            .bind(criteria_key)
            .fetch_optional(pool)
            .await?;

    if existing.is_some() {
        return Err(AppError::Validation(
            "Achievement with this title or criteria key already exists".to_string(),
        ));
    }

    let res = sqlx::query(
        "INSERT INTO achievements (title, description, points, criteria_key) VALUES (?, ?, ?, ?)",
    )
    .bind(title)
    .bind(description)
    .bind(points)
    .bind(criteria_key)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

/// Records a completion, deduplicated. Returns whether the row was newly
/// inserted, so the caller knows whether to run achievement evaluation.
#[instrument]
pub async fn add_completed_module(
    pool: &Pool<Sqlite>,
    user_id: i64,
    module_id: i64,
) -> Result<bool, AppError> {
    info!("Marking module complete");

    let result =
        sqlx::query("INSERT OR IGNORE INTO completed_modules (user_id, module_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(module_id)
            .execute(pool)
            .await?;

    Ok(result.rows_affected() > 0)
}

#[instrument]
pub async fn get_completed_module_ids(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<i64>, AppError> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT module_id FROM completed_modules WHERE user_id = ? ORDER BY module_id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Completed modules resolved to full rows. Completions whose module has
/// since been deleted drop out of the join, matching what the evaluator
/// expects.
#[instrument]
pub async fn get_completed_modules(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<Module>, AppError> {
    let rows = sqlx::query_as::<_, DbModule>(
        "SELECT m.* FROM modules m
         JOIN completed_modules cm ON cm.module_id = m.id
         WHERE cm.user_id = ?
         ORDER BY m.id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Module::from).collect())
}

#[instrument]
pub async fn get_unlocked_achievement_ids(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<i64>, AppError> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT achievement_id FROM unlocked_achievements WHERE user_id = ? ORDER BY achievement_id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// The evaluator's terminal write: the new unlocks and the updated point
/// total, persisted together.
#[instrument(skip(pool, achievement_ids))]
pub async fn record_unlocks(
    pool: &Pool<Sqlite>,
    user_id: i64,
    achievement_ids: &[i64],
    points: i64,
) -> Result<(), AppError> {
    info!(unlocks = achievement_ids.len(), points, "Recording unlocks");

    for achievement_id in achievement_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO unlocked_achievements (user_id, achievement_id) VALUES (?, ?)",
        )
        .bind(user_id)
        .bind(achievement_id)
        .execute(pool)
        .await?;
    }

    sqlx::query("UPDATE users SET points = ? WHERE id = ?")
        .bind(points)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool, text))]
pub async fn insert_chat_message(
    pool: &Pool<Sqlite>,
    sender: &str,
    text: &str,
) -> Result<ChatMessage, AppError> {
    info!("Persisting chat message");

    let res = sqlx::query("INSERT INTO messages (sender, text) VALUES (?, ?)")
        .bind(sender)
        .bind(text)
        .execute(pool)
        .await?;

    let row = sqlx::query_as::<_, DbChatMessage>(
        "SELECT id, sender, text, created_at FROM messages WHERE id = ?",
    )
    .bind(res.last_insert_rowid())
    .fetch_one(pool)
    .await?;

    Ok(ChatMessage::from(row))
}

/// Last 50 unexpired messages, oldest first.
#[instrument]
pub async fn get_recent_messages(pool: &Pool<Sqlite>) -> Result<Vec<ChatMessage>, AppError> {
    info!("Fetching chat history");

    let cutoff = Utc::now().naive_utc() - chrono::Duration::hours(MESSAGE_TTL_HOURS);

    let rows = sqlx::query_as::<_, DbChatMessage>(
        "SELECT id, sender, text, created_at FROM (
             SELECT id, sender, text, created_at FROM messages
             WHERE datetime(created_at) >= datetime(?)
             ORDER BY datetime(created_at) DESC, id DESC
             LIMIT ?
         )
         ORDER BY datetime(created_at) ASC, id ASC",
    )
    .bind(cutoff)
    .bind(CHAT_HISTORY_LIMIT)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ChatMessage::from).collect())
}

#[instrument(skip(pool))]
pub async fn clean_expired_messages(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired chat messages");

    let cutoff = Utc::now().naive_utc() - chrono::Duration::hours(MESSAGE_TTL_HOURS);

    let result = sqlx::query("DELETE FROM messages WHERE datetime(created_at) < datetime(?)")
        .bind(cutoff)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
