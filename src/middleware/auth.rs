//! Session authentication and role gates.
//!
//! `auth_middleware` intercepts every protected request to:
//! 1. Extract the bearer token from the Authorization header
//! 2. Hash it and look up a live session
//! 3. Load the session's user and require an ACTIVE account
//! 4. Inject an [`AuthContext`] into the request
//!
//! The role gates (`require_admin`, `require_team`, `require_client`) run
//! after it on their route groups and only read the injected context.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        session::Session,
        user::{Role, User, UserStatus},
    },
    services::auth_service::hash_token,
};

/// Authentication context attached to authenticated requests.
///
/// Handlers extract it with `Extension<AuthContext>`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    /// Hash of the presented token; identifies the current session
    pub token_hash: String,
}

impl AuthContext {
    /// 401 unless the caller holds one of `allowed`.
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), AppError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            tracing::info!(user_id = %self.user_id, role = ?self.role, "role not allowed for route");
            Err(AppError::Unauthorized)
        }
    }
}

/// `Authorization: Bearer <token>` → token.
fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Session authentication middleware.
///
/// # Headers
///
/// ```text
/// Authorization: Bearer 3f9c...e1
/// ```
///
/// # Returns
///
/// - `Err(AppError::Unauthorized)` when the header is missing, the session
///   is unknown or expired, or the account is not ACTIVE
pub async fn auth_middleware(
    State(pool): State<DbPool>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token_hash = hash_token(bearer_token(&request).ok_or(AppError::Unauthorized)?);

    let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE token_hash = $1")
        .bind(&token_hash)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if session.is_expired(Utc::now()) {
        return Err(AppError::Unauthorized);
    }

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(session.user_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if user.status != UserStatus::Active {
        return Err(AppError::Unauthorized);
    }

    request.extensions_mut().insert(AuthContext {
        user_id: user.id,
        email: user.email,
        role: user.role,
        token_hash,
    });

    Ok(next.run(request).await)
}

async fn gate(allowed: &[Role], request: Request, next: Next) -> Result<Response, AppError> {
    request
        .extensions()
        .get::<AuthContext>()
        .ok_or(AppError::Unauthorized)?
        .require_role(allowed)?;
    Ok(next.run(request).await)
}

pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    gate(&[Role::Admin], request, next).await
}

/// Madagascar team routes; admins may use them too.
pub async fn require_team(request: Request, next: Next) -> Result<Response, AppError> {
    gate(&[Role::MadagascarTeam, Role::Admin], request, next).await
}

pub async fn require_client(request: Request, next: Next) -> Result<Response, AppError> {
    gate(&[Role::Client], request, next).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn context(role: Role) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            email: "staff@example.ca".into(),
            role,
            token_hash: "h".into(),
        }
    }

    #[test]
    fn role_gate() {
        assert!(context(Role::Admin).require_role(&[Role::Admin]).is_ok());
        assert!(
            context(Role::MadagascarTeam)
                .require_role(&[Role::MadagascarTeam, Role::Admin])
                .is_ok()
        );
        assert!(matches!(
            context(Role::Client).require_role(&[Role::Admin]),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn bearer_token_parsing() {
        let request = Request::builder()
            .header(AUTHORIZATION, "Bearer abc123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&request), Some("abc123"));

        let basic = Request::builder()
            .header(AUTHORIZATION, "Basic abc123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&basic), None);

        let empty = Request::builder()
            .header(AUTHORIZATION, "Bearer   ")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&empty), None);
    }
}
