#[macro_use]
extern crate rocket;

mod achievements;
mod api;
mod auth;
mod chat;
mod db;
mod env;
mod error;
mod models;
mod telemetry;
mod validation;
#[cfg(test)]
mod test;

use api::{
    api_complete_module, api_create_achievement, api_create_lesson, api_create_module,
    api_delete_lesson, api_delete_module, api_get_achievements, api_get_lessons_by_module,
    api_get_module, api_get_modules, api_get_progress, api_login, api_logout, api_register,
    api_update_lesson, api_update_module, health,
};
use auth::{forbidden_api, not_found_api, unauthorized_api};
use chat::{ChatHub, api_get_chat_messages, chat_ws};
use db::{clean_expired_messages, clean_expired_tokens};
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket, tokio};
use telemetry::TelemetryFairing;

use sqlx::SqlitePool;
use tracing::{error, info};

#[launch]
async fn rocket() -> _ {
    if let Err(e) = env::load_environment() {
        eprintln!("Failed to load environment files: {}", e);
    }

    telemetry::init_tracing();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_default();

    let pool = SqlitePool::connect(&database_url)
        .await
        .expect("Failed to connect to SQLite database");

    let pool_clone = pool.clone();

    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_tokens(&pool_clone).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired auth tokens", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired auth tokens: {}", e);
                }
            }

            match clean_expired_messages(&pool_clone).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Purged {} expired chat messages", count);
                    }
                }
                Err(e) => {
                    error!("Failed to purge expired chat messages: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(3600)).await;
        }
    });

    info!("Running database migrations...");
    match sqlx::migrate!("./migrations").run(&pool).await {
        Ok(_) => info!("Migrations completed successfully"),
        Err(e) => {
            error!("Failed to run migrations: {}", e);
            panic!("Database migration failed: {}", e);
        }
    }

    init_rocket(pool).await
}

pub async fn init_rocket(pool: SqlitePool) -> Rocket<Build> {
    info!("Starting learntrack server");

    rocket::build()
        .manage(pool)
        .manage(ChatHub::new())
        .mount(
            "/api",
            routes![
                api_register,
                api_login,
                api_logout,
                api_get_modules,
                api_get_module,
                api_create_module,
                api_update_module,
                api_delete_module,
                api_get_lessons_by_module,
                api_create_lesson,
                api_update_lesson,
                api_delete_lesson,
                api_get_achievements,
                api_create_achievement,
                api_get_progress,
                api_complete_module,
                api_get_chat_messages,
                chat_ws,
            ],
        )
        .register(
            "/api",
            catchers![unauthorized_api, forbidden_api, not_found_api],
        )
        .mount("/api", routes![health])
        .attach(TelemetryFairing)
        .attach(AdHoc::on_shutdown("Telemetry shutdown", |_| {
            Box::pin(async {
                telemetry::shutdown_telemetry();
            })
        }))
}
