use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;

const TOKEN_LENGTH: usize = 48;

/// A bearer token handed out at login. Opaque on the wire; resolved to a
/// user id and role by lookup on every request.
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbAuthToken {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub token: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub expires_at: Option<NaiveDateTime>,
}

impl From<DbAuthToken> for AuthToken {
    fn from(token: DbAuthToken) -> Self {
        Self {
            id: token.id.unwrap_or_default(),
            user_id: token.user_id.unwrap_or_default(),
            token: token.token.unwrap_or_default(),
            created_at: to_utc(token.created_at),
            expires_at: to_utc(token.expires_at),
        }
    }
}

impl AuthToken {
    pub fn generate() -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now()
    }
}

fn to_utc(dt: Option<NaiveDateTime>) -> DateTime<Utc> {
    dt.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        .unwrap_or_else(Utc::now)
}
