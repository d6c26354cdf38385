use crate::auth::AuthToken;
use crate::db::{
    clean_expired_tokens, create_auth_token, get_auth_token, invalidate_auth_token,
};
use crate::error::AppError;
use crate::test::utils::TestDbBuilder;
use chrono::{Duration, NaiveDateTime, Utc};
use rocket::tokio;
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

async fn create_test_token() -> (i64, String, NaiveDateTime, Pool<Sqlite>) {
    let test_db = TestDbBuilder::new()
        .user("Token User", "token@example.com")
        .build()
        .await
        .expect("Failed to build test database");

    let user_id = test_db.user_id("token@example.com").expect("User not found");

    let token = format!("test_token_{}", Uuid::new_v4());

    let expires_at = (Utc::now() + Duration::days(1)).naive_utc();

    (user_id, token, expires_at, test_db.pool)
}

#[tokio::test]
async fn test_create_and_get_token() {
    let (user_id, token, expires_at, pool) = create_test_token().await;

    let token_id = create_auth_token(&pool, user_id, &token, expires_at)
        .await
        .expect("Failed to create token");

    assert!(token_id > 0, "Token ID should be positive");

    let auth = get_auth_token(&pool, &token)
        .await
        .expect("Failed to get token");

    assert_eq!(auth.user_id, user_id);
    assert_eq!(auth.token, token);
    assert!(auth.is_valid());

    let expires_diff = (auth.expires_at.timestamp() - expires_at.and_utc().timestamp()).abs();
    assert!(
        expires_diff <= 1,
        "Expiration timestamps should match within 1 second"
    );
}

#[tokio::test]
async fn test_get_nonexistent_token() {
    let (_, _, _, pool) = create_test_token().await;

    let result = get_auth_token(&pool, "nonexistent_token").await;

    assert!(result.is_err(), "Should return error for nonexistent token");

    if let Err(err) = result {
        match err {
            AppError::Authentication(msg) => {
                assert_eq!(msg, "Invalid auth token");
            }
            _ => panic!("Expected Authentication error, got {:?}", err),
        }
    }
}

#[tokio::test]
async fn test_invalidate_token() {
    let (user_id, token, expires_at, pool) = create_test_token().await;

    create_auth_token(&pool, user_id, &token, expires_at)
        .await
        .expect("Failed to create token");

    invalidate_auth_token(&pool, &token)
        .await
        .expect("Failed to invalidate token");

    let result = get_auth_token(&pool, &token).await;
    assert!(result.is_err(), "Invalidated token should not resolve");
}

#[tokio::test]
async fn test_clean_expired_tokens_removes_only_expired() {
    let (user_id, token, expires_at, pool) = create_test_token().await;

    create_auth_token(&pool, user_id, &token, expires_at)
        .await
        .expect("Failed to create live token");

    let expired = (Utc::now() - Duration::hours(2)).naive_utc();
    create_auth_token(&pool, user_id, "expired_token", expired)
        .await
        .expect("Failed to create expired token");

    let cleaned = clean_expired_tokens(&pool)
        .await
        .expect("Failed to clean tokens");
    assert_eq!(cleaned, 1);

    assert!(get_auth_token(&pool, &token).await.is_ok());
    assert!(get_auth_token(&pool, "expired_token").await.is_err());
}

#[tokio::test]
async fn test_expired_token_is_invalid() {
    let expired = AuthToken {
        id: 1,
        user_id: 1,
        token: "anything".to_string(),
        created_at: Utc::now() - chrono::Duration::days(2),
        expires_at: Utc::now() - chrono::Duration::days(1),
    };

    assert!(!expired.is_valid());
}

#[tokio::test]
async fn test_generated_tokens_are_unique() {
    let first = AuthToken::generate();
    let second = AuthToken::generate();

    assert_eq!(first.len(), 48);
    assert_ne!(first, second);
}
