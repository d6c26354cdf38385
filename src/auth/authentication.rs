use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde_json::{Value, json};
use sqlx::SqlitePool;

use crate::db::{get_auth_token, get_user};

use super::User;

/// Pulls the bearer token out of the Authorization header, falling back to
/// a `token` query parameter for clients that cannot set headers (the
/// WebSocket handshake).
fn bearer_token(request: &Request<'_>) -> Option<String> {
    if let Some(header) = request.headers().get_one("Authorization") {
        if let Some(token) = header.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    match request.query_value::<&str>("token") {
        Some(Ok(token)) if !token.is_empty() => Some(token.to_string()),
        _ => None,
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let auth_span = tracing::info_span!("user_auth_guard");
        let _guard = auth_span.enter();

        let token = match bearer_token(request) {
            Some(token) => token,
            _ => {
                tracing::warn!("Missing bearer token");
                return Outcome::Error((Status::Unauthorized, ()));
            }
        };

        let db = match request.rocket().state::<SqlitePool>() {
            Some(pool) => pool,
            _ => {
                tracing::error!("Database pool not found in managed state");
                return Outcome::Error((Status::InternalServerError, ()));
            }
        };

        match get_auth_token(db, &token).await {
            Ok(auth) => {
                if !auth.is_valid() {
                    tracing::warn!("Expired bearer token");
                    return Outcome::Error((Status::Unauthorized, ()));
                }

                match get_user(db, auth.user_id).await {
                    Ok(user) => {
                        tracing::info!(email = %user.email, role = %user.role.as_str(), "User authenticated via bearer token");
                        Outcome::Success(user)
                    }
                    Err(err) => {
                        tracing::error!(user_id = %auth.user_id, error = ?err, "Failed to fetch user for valid token");
                        Outcome::Error((Status::InternalServerError, ()))
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = ?err, "Invalid bearer token");
                Outcome::Error((Status::Unauthorized, ()))
            }
        }
    }
}

/// The raw bearer token, for handlers that need the credential itself
/// rather than the user it resolves to (logout).
pub struct BearerToken(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BearerToken {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match bearer_token(request) {
            Some(token) => Outcome::Success(BearerToken(token)),
            _ => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

#[catch(401)]
pub fn unauthorized_api(_req: &Request) -> Custom<Json<Value>> {
    let error_json = json!({
        "error": "Unauthorized",
        "message": "Authentication required"
    });

    Custom(Status::Unauthorized, Json(error_json))
}

#[catch(403)]
pub fn forbidden_api(_req: &Request) -> Custom<Json<Value>> {
    let error_json = json!({
        "error": "Forbidden",
        "message": "Insufficient permissions"
    });

    Custom(Status::Forbidden, Json(error_json))
}

#[catch(404)]
pub fn not_found_api(_req: &Request) -> Custom<Json<Value>> {
    let error_json = json!({
        "error": "NotFound",
        "message": "Resource not found"
    });

    Custom(Status::NotFound, Json(error_json))
}
