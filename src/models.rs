use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Beginner,
    Intermediate,
    Advanced,
}

impl Level {
    pub fn as_str(&self) -> &str {
        match self {
            Level::Beginner => "Beginner",
            Level::Intermediate => "Intermediate",
            Level::Advanced => "Advanced",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "Beginner" => Ok(Level::Beginner),
            "Intermediate" => Ok(Level::Intermediate),
            "Advanced" => Ok(Level::Advanced),
            _ => Err(AppError::Validation(format!("Unknown level: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub category: String,
    pub level: Level,
    pub lessons: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbModule {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub level: Option<String>,
    pub lessons: Option<i64>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl From<DbModule> for Module {
    fn from(module: DbModule) -> Self {
        Self {
            id: module.id.unwrap_or_default(),
            title: module.title.unwrap_or_default(),
            description: module.description.unwrap_or_default(),
            category: module.category.unwrap_or_default(),
            level: Level::from_str(&module.level.unwrap_or_default()).unwrap_or(Level::Beginner),
            lessons: module.lessons.unwrap_or_default(),
            created_at: to_utc(module.created_at),
            updated_at: to_utc(module.updated_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Paragraph,
    Code,
    Video,
}

impl BlockKind {
    pub fn as_str(&self) -> &str {
        match self {
            BlockKind::Paragraph => "paragraph",
            BlockKind::Code => "code",
            BlockKind::Video => "video",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "paragraph" => Ok(BlockKind::Paragraph),
            "code" => Ok(BlockKind::Code),
            "video" => Ok(BlockKind::Video),
            _ => Err(AppError::Validation(format!("Unknown content block: {}", s))),
        }
    }
}

/// One unit of lesson content. The `language` tag is only meaningful for
/// code blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: i64,
    pub module_id: i64,
    pub title: String,
    pub position: i64,
    pub content: Vec<ContentBlock>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbLesson {
    pub id: Option<i64>,
    pub module_id: Option<i64>,
    pub title: Option<String>,
    pub position: Option<i64>,
}

impl From<DbLesson> for Lesson {
    fn from(lesson: DbLesson) -> Self {
        Self {
            id: lesson.id.unwrap_or_default(),
            module_id: lesson.module_id.unwrap_or_default(),
            title: lesson.title.unwrap_or_default(),
            position: lesson.position.unwrap_or_default(),
            content: Vec::new(),
        }
    }
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbLessonBlock {
    pub lesson_id: Option<i64>,
    pub position: Option<i64>,
    pub kind: Option<String>,
    pub value: Option<String>,
    pub language: Option<String>,
}

impl From<DbLessonBlock> for ContentBlock {
    fn from(block: DbLessonBlock) -> Self {
        Self {
            kind: BlockKind::from_str(&block.kind.unwrap_or_default())
                .unwrap_or(BlockKind::Paragraph),
            value: block.value.unwrap_or_default(),
            language: block.language,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Achievement {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub points: i64,
    pub criteria_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbAchievement {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub points: Option<i64>,
    pub criteria_key: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbAchievement> for Achievement {
    fn from(achievement: DbAchievement) -> Self {
        Self {
            id: achievement.id.unwrap_or_default(),
            title: achievement.title.unwrap_or_default(),
            description: achievement.description.unwrap_or_default(),
            points: achievement.points.unwrap_or_default(),
            criteria_key: achievement.criteria_key.unwrap_or_default(),
            created_at: to_utc(achievement.created_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub sender: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbChatMessage {
    pub id: Option<i64>,
    pub sender: Option<String>,
    pub text: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbChatMessage> for ChatMessage {
    fn from(message: DbChatMessage) -> Self {
        Self {
            id: message.id.unwrap_or_default(),
            sender: message.sender.unwrap_or_default(),
            text: message.text.unwrap_or_default(),
            created_at: to_utc(message.created_at),
        }
    }
}

fn to_utc(dt: Option<NaiveDateTime>) -> DateTime<Utc> {
    dt.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        .unwrap_or_else(Utc::now)
}
