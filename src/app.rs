//! Shared application state and the HTTP router.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::FromRef,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::Config,
    db::DbPool,
    handlers::{
        admin, auth, beneficiaries, dashboard, health, notifications, rates, subscriptions, team,
        transfers, webhooks,
    },
    middleware::{
        auth::{auth_middleware, require_admin, require_client, require_team},
        rate_limit::{RateLimiter, rate_limit_middleware},
    },
    services::{payments::PaymentProcessor, scheduler::ScheduledJobsService},
};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    pub payments: Arc<dyn PaymentProcessor>,
    pub scheduler: Arc<ScheduledJobsService>,
    pub auth_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(pool: DbPool, config: Config, payments: Arc<dyn PaymentProcessor>) -> Self {
        let scheduler = ScheduledJobsService::new(
            pool.clone(),
            Duration::from_secs(config.scheduler_interval_secs.max(1)),
        );
        let auth_limiter = RateLimiter::new(
            config.auth_rate_limit_capacity,
            config.auth_rate_limit_refill_per_sec,
        )
        .with_max_clients(config.auth_rate_limit_max_clients)
        .trust_forwarded_for(config.trust_proxy_headers);
        Self {
            pool,
            config: Arc::new(config),
            payments,
            scheduler: Arc::new(scheduler),
            auth_limiter: Arc::new(auth_limiter),
        }
    }
}

/// Lets handlers that only need the database take `State<DbPool>`.
impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

/// Build the full router.
///
/// # Route Groups
///
/// - public: health, payment webhooks
/// - auth: register/login/verification, rate limited per client
/// - authenticated: everything else; a session is required and role
///   gates apply per group (client, team, admin)
pub fn build_router(state: AppState) -> Router {
    let public_auth_routes = Router::new()
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/verify-email", post(auth::verify_email))
        .route(
            "/api/v1/auth/resend-verification",
            post(auth::resend_verification),
        )
        .route_layer(from_fn_with_state(
            Arc::clone(&state.auth_limiter),
            rate_limit_middleware,
        ));

    // Any authenticated role
    let common_routes = Router::new()
        .route("/api/v1/auth/logout", post(auth::logout))
        .route("/api/v1/auth/me", get(auth::me))
        .route("/api/v1/auth/password", put(auth::change_password))
        .route("/api/v1/exchange-rate", get(rates::current_rate))
        .route("/api/v1/quote", get(rates::quote))
        .route(
            "/api/v1/notifications",
            get(notifications::list_notifications),
        )
        .route(
            "/api/v1/notifications/unread-count",
            get(notifications::unread_count),
        )
        .route(
            "/api/v1/notifications/read-all",
            post(notifications::mark_all_read),
        )
        .route(
            "/api/v1/notifications/{id}/read",
            post(notifications::mark_read),
        )
        .route(
            "/api/v1/notifications/{id}",
            delete(notifications::delete_notification),
        );

    let client_routes = Router::new()
        .route(
            "/api/v1/beneficiaries",
            get(beneficiaries::list_beneficiaries).post(beneficiaries::create_beneficiary),
        )
        .route(
            "/api/v1/beneficiaries/{id}",
            get(beneficiaries::get_beneficiary)
                .put(beneficiaries::update_beneficiary)
                .delete(beneficiaries::delete_beneficiary),
        )
        .route(
            "/api/v1/subscriptions",
            get(subscriptions::list_subscriptions).post(subscriptions::create_subscription),
        )
        .route(
            "/api/v1/subscriptions/{id}",
            get(subscriptions::get_subscription).put(subscriptions::update_subscription),
        )
        .route(
            "/api/v1/subscriptions/{id}/pause",
            post(subscriptions::pause_subscription),
        )
        .route(
            "/api/v1/subscriptions/{id}/resume",
            post(subscriptions::resume_subscription),
        )
        .route(
            "/api/v1/subscriptions/{id}/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route(
            "/api/v1/transfers",
            get(transfers::list_transfers).post(transfers::create_transfer),
        )
        .route("/api/v1/transfers/{id}", get(transfers::get_transfer))
        .route("/api/v1/dashboard", get(dashboard::client_dashboard))
        .route_layer(from_fn(require_client));

    let team_routes = Router::new()
        .route("/api/v1/team/dashboard", get(team::team_dashboard))
        .route("/api/v1/team/transfers", get(team::list_transfers))
        .route(
            "/api/v1/team/transfers/{id}/confirm",
            post(team::confirm_transfer),
        )
        .route("/api/v1/team/transfers/{id}/fail", post(team::fail_transfer))
        .route_layer(from_fn(require_team));

    let admin_routes = Router::new()
        .route(
            "/api/v1/admin/users",
            get(admin::list_users).post(admin::create_user),
        )
        .route("/api/v1/admin/users/{id}", get(admin::get_user))
        .route(
            "/api/v1/admin/users/{id}/status",
            put(admin::update_user_status),
        )
        .route("/api/v1/admin/transfers", get(admin::list_transfers))
        .route("/api/v1/admin/transfers/{id}", get(admin::get_transfer))
        .route(
            "/api/v1/admin/transfers/{id}/retry",
            post(admin::retry_transfer),
        )
        .route(
            "/api/v1/admin/transfers/{id}/confirm",
            post(admin::confirm_transfer),
        )
        .route("/api/v1/admin/stats", get(admin::stats))
        .route("/api/v1/admin/reports/daily", get(admin::daily_report))
        .route(
            "/api/v1/admin/settings",
            get(admin::get_settings).put(admin::update_settings),
        )
        .route(
            "/api/v1/admin/exchange-rates",
            get(admin::list_exchange_rates).post(admin::set_exchange_rate),
        )
        .route("/api/v1/admin/jobs", get(admin::job_status))
        .route("/api/v1/admin/jobs/start", post(admin::start_jobs))
        .route("/api/v1/admin/jobs/stop", post(admin::stop_jobs))
        .route("/api/v1/admin/jobs/run", post(admin::run_jobs))
        .route(
            "/api/v1/admin/rate-limits/clear",
            post(admin::clear_rate_limits),
        )
        .route_layer(from_fn(require_admin));

    // The session check wraps the role gates, so it runs first.
    let authenticated_routes = common_routes
        .merge(client_routes)
        .merge(team_routes)
        .merge(admin_routes)
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/webhooks/stripe", post(webhooks::stripe_webhook))
        .merge(public_auth_routes)
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::create_lazy_pool,
        services::payments::{DisabledProcessor, webhook::sign},
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header::CONTENT_TYPE},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let config = Config::for_tests();
        let pool = create_lazy_pool(&config.database_url).unwrap();
        AppState::new(pool, config, Arc::new(DisabledProcessor))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn protected_routes_require_a_session() {
        let app = build_router(test_state());
        for (method, uri) in [
            ("GET", "/api/v1/auth/me"),
            ("GET", "/api/v1/beneficiaries"),
            ("GET", "/api/v1/team/transfers"),
            ("POST", "/api/v1/admin/transfers/00000000-0000-0000-0000-000000000001/retry"),
            ("POST", "/api/v1/admin/jobs/start"),
        ] {
            let response = app
                .clone()
                .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
            let body = body_json(response).await;
            assert_eq!(body["error"]["code"], "unauthorized");
        }
    }

    #[tokio::test]
    async fn non_bearer_authorization_is_rejected() {
        let response = build_router(test_state())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/admin/stats")
                    .header("authorization", "Basic YWRtaW46YWRtaW4=")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn webhook_with_bad_signature_is_rejected() {
        let response = build_router(test_state())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/webhooks/stripe")
                    .header("stripe-signature", "t=1,v1=deadbeef")
                    .body(Body::from(r#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_without_signature_is_rejected() {
        let response = build_router(test_state())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/webhooks/stripe")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn signed_unknown_event_is_acknowledged() {
        let payload = r#"{"id":"evt_2","type":"customer.created","data":{"object":{"id":"cus_1"}}}"#;
        let header = sign(
            payload.as_bytes(),
            "whsec_test_secret",
            chrono::Utc::now().timestamp(),
        );

        let response = build_router(test_state())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/webhooks/stripe")
                    .header("stripe-signature", header)
                    .body(Body::from(payload))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["received"], true);
        assert_eq!(body["outcome"], "ignored");
    }

    #[tokio::test]
    async fn auth_routes_are_rate_limited() {
        // Test config: bucket of 3, no refill.
        let app = build_router(test_state());
        let login = || {
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/login")
                .header(CONTENT_TYPE, "application/json")
                .header("x-forwarded-for", "198.51.100.4")
                .body(Body::from(r#"{"email":"","password":""}"#))
                .unwrap()
        };

        for _ in 0..3 {
            let response = app.clone().oneshot(login()).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
        let response = app.clone().oneshot(login()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(response).await["error"]["code"], "rate_limited");
    }

    #[tokio::test]
    async fn malformed_bodies_use_the_error_envelope() {
        let app = build_router(test_state());
        for (content_type, body) in [
            ("application/json", "{}"),
            ("application/json", "{not json"),
            ("text/plain", r#"{"email":"a@b.c","password":"x"}"#),
        ] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/api/v1/auth/login")
                        .header(CONTENT_TYPE, content_type)
                        .header("x-forwarded-for", "198.51.100.9")
                        .body(Body::from(body))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{content_type} {body}");
            assert_eq!(body_json(response).await["error"]["code"], "invalid_request");
        }
    }

    #[tokio::test]
    async fn rate_limit_is_per_client() {
        let state = test_state();
        let limiter = Arc::clone(&state.auth_limiter);
        let app = build_router(state);
        let login = |ip: &str| {
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/login")
                .header(CONTENT_TYPE, "application/json")
                .header("x-forwarded-for", ip)
                .body(Body::from(r#"{"email":"","password":""}"#))
                .unwrap()
        };

        for _ in 0..4 {
            let _ = app.clone().oneshot(login("198.51.100.5")).await.unwrap();
        }
        let other = app.clone().oneshot(login("198.51.100.6")).await.unwrap();
        assert_eq!(other.status(), StatusCode::BAD_REQUEST);

        limiter.clear().await;
        let again = app.clone().oneshot(login("198.51.100.5")).await.unwrap();
        assert_eq!(again.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let response = build_router(test_state())
            .oneshot(Request::builder().uri("/api/v2/nothing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
