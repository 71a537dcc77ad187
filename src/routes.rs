//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod audit;
mod members;
mod proposals;

use crate::config::Settings;
use crate::identity::{USER_ID_HEADER, USER_LEVEL_HEADER, USER_NAME_HEADER};
use crate::state::SharedState;
use axum::{
    http::{header, HeaderName, Method},
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    let cors = build_cors_layer(settings);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    Router::new()
        // Health check
        .route("/health", get(health_check))

        // Member routes
        .route(
            "/api/members",
            post(members::register_member).get(members::list_members),
        )
        .route("/api/members/roster", get(members::get_roster))
        .route(
            "/api/members/{id}",
            get(members::get_member).delete(members::remove_member),
        )

        // Proposal routes
        .route(
            "/api/proposals",
            post(proposals::create_proposal).get(proposals::list_proposals),
        )
        .route(
            "/api/proposals/{id}",
            get(proposals::get_proposal).delete(proposals::delete_proposal),
        )
        .route(
            "/api/proposals/{id}/metadata",
            axum::routing::put(proposals::update_metadata),
        )
        .route(
            "/api/proposals/{id}/content",
            axum::routing::put(proposals::replace_content),
        )
        .route("/api/proposals/{id}/submit", post(proposals::submit_proposal))
        .route("/api/proposals/{id}/withdraw", post(proposals::withdraw_proposal))
        .route("/api/proposals/{id}/revise", post(proposals::revise_proposal))

        // Block routes
        .route("/api/proposals/{id}/blocks", post(proposals::insert_block))
        .route(
            "/api/proposals/{id}/blocks/{block_id}",
            get(proposals::get_block)
                .patch(proposals::update_block)
                .delete(proposals::remove_block),
        )
        .route("/api/proposals/{id}/blocks/{block_id}/move", post(proposals::move_block))
        .route(
            "/api/proposals/{id}/blocks/{block_id}/reorder",
            post(proposals::reorder_block),
        )
        .route(
            "/api/proposals/{id}/blocks/{block_id}/retype",
            post(proposals::retype_block),
        )

        // Voting routes
        .route("/api/proposals/{id}/votes", post(proposals::cast_vote))
        .route("/api/proposals/{id}/tally", get(proposals::get_tally))

        // Audit
        .route("/api/audit", get(audit::list_audit))

        // Apply middleware and state
        .layer(middleware)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [
        header::CONTENT_TYPE,
        header::ACCEPT,
        HeaderName::from_static(USER_ID_HEADER),
        HeaderName::from_static(USER_NAME_HEADER),
        HeaderName::from_static(USER_LEVEL_HEADER),
    ];

    let cors = if origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(origins)
    };
    cors.allow_methods(methods)
        .allow_headers(headers)
        .max_age(Duration::from_secs(3600))
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TribunalConfig;
    use crate::state::AppState;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct Caller {
        id: Uuid,
        name: &'static str,
        level: u8,
    }

    impl Caller {
        fn new(name: &'static str, level: u8) -> Self {
            Self { id: Uuid::new_v4(), name, level }
        }
    }

    async fn app() -> Router {
        let state = Arc::new(AppState::new(&TribunalConfig::default()).await.unwrap());
        create_router(state, &Settings::from_lookup(|_| None).unwrap())
    }

    async fn send(app: &Router, method: Method, uri: &str, caller: Option<&Caller>, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(c) = caller {
            builder = builder
                .header(USER_ID_HEADER, c.id.to_string())
                .header(USER_NAME_HEADER, c.name)
                .header(USER_LEVEL_HEADER, c.level.to_string());
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        app.clone().oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = app().await;
        let response = send(&app, Method::GET, "/health", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let app = app().await;
        let response = send(
            &app,
            Method::POST,
            "/api/proposals",
            None,
            Some(json!({ "title": "t", "category": "theoretical", "targetLevel": 1 })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_create_validates_body() {
        let app = app().await;
        let author = Caller::new("Ana", 6);
        let response = send(
            &app,
            Method::POST,
            "/api/proposals",
            Some(&author),
            Some(json!({ "title": "", "category": "practical", "targetLevel": 9 })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_proposal_lifecycle_over_http() {
        let app = app().await;
        let author = Caller::new("Ana", 6);
        let reviewer = Caller::new("Bruno", 6);

        for c in [&author, &reviewer] {
            let response = send(&app, Method::POST, "/api/members", Some(c), None).await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = send(
            &app,
            Method::POST,
            "/api/proposals",
            Some(&author),
            Some(json!({
                "title": "Major scales",
                "description": "Building scales from whole and half steps",
                "category": "theoretical",
                "targetLevel": 2
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = json_body(response).await["proposal"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = send(
            &app,
            Method::POST,
            &format!("/api/proposals/{}/blocks", id),
            Some(&author),
            Some(json!({ "type": "text", "content": "W W H W W W H" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        // Only the author may edit
        let response = send(
            &app,
            Method::POST,
            &format!("/api/proposals/{}/blocks", id),
            Some(&reviewer),
            Some(json!({ "type": "quote", "content": "hijack" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = send(&app, Method::POST, &format!("/api/proposals/{}/submit", id), Some(&author), None).await;
        assert_eq!(response.status(), StatusCode::OK);

        for c in [&author, &reviewer] {
            let response = send(
                &app,
                Method::POST,
                &format!("/api/proposals/{}/votes", id),
                Some(c),
                Some(json!({ "decision": "approve" })),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = send(&app, Method::GET, &format!("/api/proposals/{}", id), None, None).await;
        let body = json_body(response).await;
        assert_eq!(body["proposal"]["status"], "approved");

        // Voting on a resolved proposal is a state error
        let response = send(
            &app,
            Method::POST,
            &format!("/api/proposals/{}/votes", id),
            Some(&reviewer),
            Some(json!({ "decision": "reject", "reason": "late" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["code"], "STATE_ERROR");

        let response = send(&app, Method::GET, &format!("/api/audit?proposalId={}", id), None, None).await;
        let body = json_body(response).await;
        assert_eq!(body["entries"][0]["action"], "proposal_approved");
    }

    async fn pending_proposal(app: &Router, author: &Caller) -> String {
        let response = send(
            app,
            Method::POST,
            "/api/proposals",
            Some(author),
            Some(json!({
                "title": "Syncopation",
                "description": "Accents off the beat",
                "category": "practical",
                "targetLevel": 3
            })),
        )
        .await;
        let id = json_body(response).await["proposal"]["id"]
            .as_str()
            .unwrap()
            .to_string();
        let response = send(
            app,
            Method::POST,
            &format!("/api/proposals/{}/blocks", id),
            Some(author),
            Some(json!({ "type": "checklist", "content": "[ ] clap\n[x] count" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let response = send(app, Method::POST, &format!("/api/proposals/{}/submit", id), Some(author), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        id
    }

    #[tokio::test]
    async fn test_single_reject_vetoes_over_http() {
        let app = app().await;
        let author = Caller::new("Ana", 6);
        let first = Caller::new("Bruno", 6);
        let second = Caller::new("Carla", 6);
        for c in [&author, &first, &second] {
            send(&app, Method::POST, "/api/members", Some(c), None).await;
        }
        let id = pending_proposal(&app, &author).await;

        let response = send(
            &app,
            Method::POST,
            &format!("/api/proposals/{}/votes", id),
            Some(&first),
            Some(json!({ "decision": "approve" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["resolution"], "pending");

        // Blank reasons are refused
        let response = send(
            &app,
            Method::POST,
            &format!("/api/proposals/{}/votes", id),
            Some(&second),
            Some(json!({ "decision": "reject", "reason": "   " })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(
            &app,
            Method::POST,
            &format!("/api/proposals/{}/votes", id),
            Some(&second),
            Some(json!({ "decision": "reject", "reason": "Examples are missing" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["resolution"], "rejected");
        assert_eq!(body["proposal"]["status"], "rejected");
        assert_eq!(body["proposal"]["rejectionReason"], "Examples are missing");

        // Rejected is terminal for votes
        let response = send(
            &app,
            Method::POST,
            &format!("/api/proposals/{}/votes", id),
            Some(&author),
            Some(json!({ "decision": "approve" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_metadata_update_validates_target_level() {
        let app = app().await;
        let author = Caller::new("Ana", 6);
        let id = pending_proposal(&app, &author).await;

        let response = send(
            &app,
            Method::PUT,
            &format!("/api/proposals/{}/metadata", id),
            Some(&author),
            Some(json!({ "targetLevel": 0 })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(
            &app,
            Method::PUT,
            &format!("/api/proposals/{}/metadata", id),
            Some(&author),
            Some(json!({ "targetLevel": 4 })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["proposal"]["targetLevel"], 4);
    }

    #[tokio::test]
    async fn test_unknown_proposal_is_not_found() {
        let app = app().await;
        let uri = format!("/api/proposals/{}", Uuid::new_v4());
        let response = send(&app, Method::GET, &uri, None, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
