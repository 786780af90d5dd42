//! Login session model.
//!
//! Sessions are stored the same way credentials are: only the SHA-256 hash
//! of the bearer token lives in the database.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Represents a session record from the database.
///
/// # Database Table
///
/// Maps to the `sessions` table with columns:
/// - `id`: Unique identifier (UUID)
/// - `user_id`: Owner of the session
/// - `token_hash`: SHA-256 hash of the bearer token
/// - `expires_at`: Sessions past this instant are rejected and later purged
/// - `created_at`: Login time
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
