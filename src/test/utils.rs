use crate::auth::Role;
use crate::db::{add_completed_module, create_achievement, create_module, create_user};
use crate::error::AppError;
use crate::init_rocket;
use crate::models::Level;
use rocket::http::{ContentType, Header};
use rocket::local::asynchronous::Client;
use serde_json::json;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::sync::Once;

static INIT: Once = Once::new();
pub static STANDARD_PASSWORD: &str = "password123";

pub struct TestUser {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub password: String,
}

pub struct TestModule {
    pub title: String,
    pub category: String,
    pub level: Level,
}

pub struct TestAchievement {
    pub title: String,
    pub points: i64,
    pub criteria_key: String,
}

pub struct TestCompletion {
    pub email: String,
    pub module_title: String,
}

#[derive(Default)]
pub struct TestDbBuilder {
    users: Vec<TestUser>,
    modules: Vec<TestModule>,
    achievements: Vec<TestAchievement>,
    completions: Vec<TestCompletion>,
}

impl TestDbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, name: &str, email: &str) -> Self {
        self.users.push(TestUser {
            name: name.to_string(),
            email: email.to_string(),
            role: Role::User,
            password: STANDARD_PASSWORD.to_string(),
        });
        self
    }

    pub fn admin(mut self, name: &str, email: &str) -> Self {
        self.users.push(TestUser {
            name: name.to_string(),
            email: email.to_string(),
            role: Role::Admin,
            password: STANDARD_PASSWORD.to_string(),
        });
        self
    }

    pub fn module(mut self, title: &str, category: &str) -> Self {
        self.modules.push(TestModule {
            title: title.to_string(),
            category: category.to_string(),
            level: Level::Beginner,
        });
        self
    }

    pub fn achievement(mut self, title: &str, points: i64, criteria_key: &str) -> Self {
        self.achievements.push(TestAchievement {
            title: title.to_string(),
            points,
            criteria_key: criteria_key.to_string(),
        });
        self
    }

    /// The full five-entry catalog with the default 50-point award.
    pub fn standard_achievements(self) -> Self {
        self.achievement("First Steps", 50, crate::achievements::FIRST_STEPS)
            .achievement("Speed Learner", 50, crate::achievements::SPEED_LEARNER)
            .achievement("Knowledge Seeker", 50, crate::achievements::KNOWLEDGE_SEEKER)
            .achievement(
                "Programming Master",
                50,
                crate::achievements::PROGRAMMING_MASTER,
            )
            .achievement("Point Collector", 50, crate::achievements::POINT_COLLECTOR)
    }

    pub fn completed(mut self, email: &str, module_title: &str) -> Self {
        self.completions.push(TestCompletion {
            email: email.to_string(),
            module_title: module_title.to_string(),
        });
        self
    }

    pub async fn build(self) -> Result<TestDb, AppError> {
        INIT.call_once(|| {
            let _ = env_logger::builder()
                .parse_filters("debug")
                .is_test(true)
                .try_init();
        });

        let pool = SqlitePool::connect("sqlite::memory:").await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        let mut user_id_map: HashMap<String, i64> = HashMap::new();
        let mut module_id_map: HashMap<String, i64> = HashMap::new();
        let mut achievement_id_map: HashMap<String, i64> = HashMap::new();

        for user in &self.users {
            let user_id = create_user(
                &pool,
                &user.name,
                &user.email,
                &user.password,
                user.role.as_str(),
            )
            .await?;

            user_id_map.insert(user.email.clone(), user_id);
        }

        for module in &self.modules {
            let module_id = create_module(
                &pool,
                &module.title,
                "Test module description",
                &module.category,
                &module.level,
                0,
            )
            .await?;

            module_id_map.insert(module.title.clone(), module_id);
        }

        for achievement in &self.achievements {
            let achievement_id = create_achievement(
                &pool,
                &achievement.title,
                "Test achievement description",
                achievement.points,
                &achievement.criteria_key,
            )
            .await?;

            achievement_id_map.insert(achievement.criteria_key.clone(), achievement_id);
        }

        for completion in &self.completions {
            let user_id = user_id_map
                .get(&completion.email)
                .copied()
                .ok_or_else(|| AppError::NotFound(completion.email.clone()))?;
            let module_id = module_id_map
                .get(&completion.module_title)
                .copied()
                .ok_or_else(|| AppError::NotFound(completion.module_title.clone()))?;

            add_completed_module(&pool, user_id, module_id).await?;
        }

        Ok(TestDb {
            pool,
            user_id_map,
            module_id_map,
            achievement_id_map,
        })
    }
}

pub struct TestDb {
    pub pool: Pool<Sqlite>,
    pub user_id_map: HashMap<String, i64>,
    pub module_id_map: HashMap<String, i64>,
    pub achievement_id_map: HashMap<String, i64>,
}

impl TestDb {
    pub fn user_id(&self, email: &str) -> Option<i64> {
        self.user_id_map.get(email).copied()
    }

    pub fn module_id(&self, title: &str) -> Option<i64> {
        self.module_id_map.get(title).copied()
    }

    pub fn achievement_id(&self, criteria_key: &str) -> Option<i64> {
        self.achievement_id_map.get(criteria_key).copied()
    }
}

/// A user, an admin, three modules and the full achievement catalog.
pub async fn create_standard_test_db() -> TestDb {
    TestDbBuilder::new()
        .user("Test User", "user@example.com")
        .admin("Admin User", "admin@example.com")
        .module("Intro to Rust", "Programming")
        .module("Ownership in Depth", "Programming")
        .module("Watercolor Basics", "Art")
        .standard_achievements()
        .build()
        .await
        .expect("Failed to build test DB")
}

pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
    let rocket = init_rocket(test_db.pool.clone()).await;
    let client = Client::tracked(rocket)
        .await
        .expect("Failed to build test client");
    (client, test_db)
}

/// Logs in through the API and hands back the bearer token.
pub async fn login_test_user(client: &Client, email: &str, password: &str) -> String {
    let response = client
        .post("/api/users/login")
        .header(ContentType::JSON)
        .body(
            json!({
                "email": email,
                "password": password
            })
            .to_string(),
        )
        .dispatch()
        .await;

    let body = response.into_string().await.expect("Empty login response");
    let login: crate::api::LoginResponse =
        serde_json::from_str(&body).expect("Failed to parse login response");
    login.token
}

pub fn bearer(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {}", token))
}
