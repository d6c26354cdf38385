use crate::api::{LoginResponse, ModuleLessonsResponse, UserData};
use crate::models::{Achievement, Module};
use crate::test::utils::{
    STANDARD_PASSWORD, bearer, create_standard_test_db, login_test_user, setup_test_client,
};
use rocket::http::{ContentType, Status};
use serde_json::json;

#[rocket::async_test]
async fn test_register_and_login() {
    let test_db = create_standard_test_db().await;
    let (client, _) = setup_test_client(test_db).await;

    let response = client
        .post("/api/users")
        .header(ContentType::JSON)
        .body(
            json!({
                "name": "New Learner",
                "email": "new@example.com",
                "password": "password123"
            })
            .to_string(),
        )
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Created);

    let body = response.into_string().await.unwrap();
    let user: UserData = serde_json::from_str(&body).unwrap();
    assert_eq!(user.name, "New Learner");
    assert_eq!(user.email, "new@example.com");
    assert_eq!(user.role, "user");

    // Same email again is rejected.
    let response = client
        .post("/api/users")
        .header(ContentType::JSON)
        .body(
            json!({
                "name": "Someone Else",
                "email": "new@example.com",
                "password": "password456"
            })
            .to_string(),
        )
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::BadRequest);

    let response = client
        .post("/api/users/login")
        .header(ContentType::JSON)
        .body(
            json!({
                "email": "new@example.com",
                "password": "password123"
            })
            .to_string(),
        )
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let login: LoginResponse = serde_json::from_str(&body).unwrap();
    assert!(!login.token.is_empty());
    assert_eq!(login.user.email, "new@example.com");

    let response = client
        .post("/api/users/login")
        .header(ContentType::JSON)
        .body(
            json!({
                "email": "new@example.com",
                "password": "wrong_password"
            })
            .to_string(),
        )
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::BadRequest);
}

#[rocket::async_test]
async fn test_auth_required_apis() {
    let test_db = create_standard_test_db().await;
    let (client, _) = setup_test_client(test_db).await;

    let endpoints = vec![
        "/api/progress",
        "/api/chat/messages",
        "/api/lessons/by-module/1",
    ];

    for endpoint in endpoints {
        let response = client.get(endpoint).dispatch().await;
        assert_eq!(
            response.status(),
            Status::Unauthorized,
            "Endpoint {} did not require authentication",
            endpoint
        );
    }
}

#[rocket::async_test]
async fn test_forged_token_rejected() {
    let test_db = create_standard_test_db().await;
    let (client, _) = setup_test_client(test_db).await;

    let response = client
        .get("/api/progress")
        .header(bearer("fake_token"))
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Unauthorized);
}

#[rocket::async_test]
async fn test_expired_token_rejected() {
    use crate::db::create_auth_token;
    use chrono::{Duration, Utc};

    let test_db = create_standard_test_db().await;
    let user_id = test_db.user_id("user@example.com").expect("User not found");
    let expired_at = (Utc::now() - Duration::hours(1)).naive_utc();

    create_auth_token(&test_db.pool, user_id, "stale_token", expired_at)
        .await
        .expect("Failed to create token");

    let (client, _) = setup_test_client(test_db).await;

    let response = client
        .get("/api/progress")
        .header(bearer("stale_token"))
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Unauthorized);
}

#[rocket::async_test]
async fn test_modules_are_public() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let response = client.get("/api/modules").dispatch().await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let modules: Vec<Module> = serde_json::from_str(&body).unwrap();
    assert_eq!(modules.len(), 3);

    let module_id = test_db.module_id("Intro to Rust").unwrap();
    let response = client
        .get(format!("/api/modules/{}", module_id))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let module: Module = serde_json::from_str(&body).unwrap();
    assert_eq!(module.title, "Intro to Rust");
    assert_eq!(module.category, "Programming");

    let response = client.get("/api/modules/9999").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);
}

#[rocket::async_test]
async fn test_module_crud_requires_admin() {
    let test_db = create_standard_test_db().await;
    let (client, _) = setup_test_client(test_db).await;

    let user_token = login_test_user(&client, "user@example.com", STANDARD_PASSWORD).await;

    let response = client
        .post("/api/modules")
        .header(bearer(&user_token))
        .header(ContentType::JSON)
        .body(
            json!({
                "title": "Sneaky Module",
                "description": "Should not exist",
                "category": "Programming",
                "level": "Beginner"
            })
            .to_string(),
        )
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Forbidden);
}

#[rocket::async_test]
async fn test_module_crud_as_admin() {
    let test_db = create_standard_test_db().await;
    let (client, _) = setup_test_client(test_db).await;

    let admin_token = login_test_user(&client, "admin@example.com", STANDARD_PASSWORD).await;

    let response = client
        .post("/api/modules")
        .header(bearer(&admin_token))
        .header(ContentType::JSON)
        .body(
            json!({
                "title": "Advanced Rust",
                "description": "Lifetimes and beyond",
                "category": "Programming",
                "level": "Advanced",
                "lessons": 4
            })
            .to_string(),
        )
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Created);

    let body = response.into_string().await.unwrap();
    let module: Module = serde_json::from_str(&body).unwrap();
    assert_eq!(module.title, "Advanced Rust");
    assert_eq!(module.lessons, 4);

    let response = client
        .put(format!("/api/modules/{}", module.id))
        .header(bearer(&admin_token))
        .header(ContentType::JSON)
        .body(
            json!({
                "description": "Lifetimes, pinning, and beyond"
            })
            .to_string(),
        )
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let updated: Module = serde_json::from_str(&body).unwrap();
    assert_eq!(updated.description, "Lifetimes, pinning, and beyond");
    assert_eq!(updated.title, "Advanced Rust");

    let response = client
        .delete(format!("/api/modules/{}", module.id))
        .header(bearer(&admin_token))
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);

    let response = client
        .get(format!("/api/modules/{}", module.id))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);

    // Rejected level values never reach the database.
    let response = client
        .post("/api/modules")
        .header(bearer(&admin_token))
        .header(ContentType::JSON)
        .body(
            json!({
                "title": "Mystery Module",
                "description": "Unknown difficulty",
                "category": "Programming",
                "level": "Impossible"
            })
            .to_string(),
        )
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::BadRequest);
}

#[rocket::async_test]
async fn test_lesson_crud_and_query() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let module_id = test_db.module_id("Intro to Rust").unwrap();
    let admin_token = login_test_user(&client, "admin@example.com", STANDARD_PASSWORD).await;
    let user_token = login_test_user(&client, "user@example.com", STANDARD_PASSWORD).await;

    let response = client
        .post("/api/lessons")
        .header(bearer(&admin_token))
        .header(ContentType::JSON)
        .body(
            json!({
                "module_id": module_id,
                "title": "Hello, Cargo",
                "position": 2,
                "content": [
                    { "type": "paragraph", "value": "Cargo is the build tool." },
                    { "type": "code", "value": "fn main() {}", "language": "rust" }
                ]
            })
            .to_string(),
        )
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Created);

    let response = client
        .post("/api/lessons")
        .header(bearer(&admin_token))
        .header(ContentType::JSON)
        .body(
            json!({
                "module_id": module_id,
                "title": "Installing Rust",
                "position": 1,
                "content": [
                    { "type": "video", "value": "https://example.com/install.mp4" }
                ]
            })
            .to_string(),
        )
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Created);

    // Ordinary users read lessons ordered by position.
    let response = client
        .get(format!("/api/lessons/by-module/{}", module_id))
        .header(bearer(&user_token))
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let data: ModuleLessonsResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(data.module.title, "Intro to Rust");
    assert_eq!(data.lessons.len(), 2);
    assert_eq!(data.lessons[0].title, "Installing Rust");
    assert_eq!(data.lessons[1].title, "Hello, Cargo");
    assert_eq!(data.lessons[1].content.len(), 2);
    assert_eq!(
        data.lessons[1].content[1].language.as_deref(),
        Some("rust")
    );

    // Lesson writes are admin-only.
    let lesson_id = data.lessons[0].id;
    let response = client
        .put(format!("/api/lessons/{}", lesson_id))
        .header(bearer(&user_token))
        .header(ContentType::JSON)
        .body(json!({ "title": "Hijacked" }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Forbidden);

    let response = client
        .put(format!("/api/lessons/{}", lesson_id))
        .header(bearer(&admin_token))
        .header(ContentType::JSON)
        .body(
            json!({
                "title": "Installing the Toolchain",
                "content": [
                    { "type": "paragraph", "value": "Use rustup." }
                ]
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let updated: crate::models::Lesson = serde_json::from_str(&body).unwrap();
    assert_eq!(updated.title, "Installing the Toolchain");
    assert_eq!(updated.content.len(), 1);

    let response = client
        .delete(format!("/api/lessons/{}", lesson_id))
        .header(bearer(&admin_token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let response = client
        .get(format!("/api/lessons/by-module/{}", module_id))
        .header(bearer(&user_token))
        .dispatch()
        .await;
    let body = response.into_string().await.unwrap();
    let data: ModuleLessonsResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(data.lessons.len(), 1);

    // Lessons for a nonexistent module 404 rather than returning empty.
    let response = client
        .get("/api/lessons/by-module/9999")
        .header(bearer(&user_token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);
}

#[rocket::async_test]
async fn test_achievement_catalog() {
    let test_db = create_standard_test_db().await;
    let (client, _) = setup_test_client(test_db).await;

    let response = client.get("/api/achievements").dispatch().await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let achievements: Vec<Achievement> = serde_json::from_str(&body).unwrap();
    assert_eq!(achievements.len(), 5);

    let admin_token = login_test_user(&client, "admin@example.com", STANDARD_PASSWORD).await;
    let user_token = login_test_user(&client, "user@example.com", STANDARD_PASSWORD).await;

    let response = client
        .post("/api/achievements")
        .header(bearer(&user_token))
        .header(ContentType::JSON)
        .body(
            json!({
                "title": "Night Owl",
                "description": "Complete a module after midnight",
                "criteria_key": "NIGHT_OWL"
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Forbidden);

    let response = client
        .post("/api/achievements")
        .header(bearer(&admin_token))
        .header(ContentType::JSON)
        .body(
            json!({
                "title": "Night Owl",
                "description": "Complete a module after midnight",
                "criteria_key": "NIGHT_OWL"
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Created);

    let body = response.into_string().await.unwrap();
    let achievement: Achievement = serde_json::from_str(&body).unwrap();
    assert_eq!(achievement.points, 50);
    assert_eq!(achievement.criteria_key, "NIGHT_OWL");

    // Duplicate titles and keys are rejected.
    let response = client
        .post("/api/achievements")
        .header(bearer(&admin_token))
        .header(ContentType::JSON)
        .body(
            json!({
                "title": "Night Owl",
                "description": "Again",
                "criteria_key": "NIGHT_OWL_2"
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
}
