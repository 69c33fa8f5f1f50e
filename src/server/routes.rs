//! Route table and capability guard
//!
//! Every HTTP endpoint is declared once in [`route_table`] with the
//! capabilities it requires. Guarded routes resolve the `authorization`
//! header before the handler runs and hand it the [`Authenticated`]
//! principal as a request extension.

use crate::auth::{Authenticated, Capability, CredentialResolver, Requirement};
use crate::server::error::ApiError;
use crate::server::{handlers, websocket, AppState};
use axum::{
    extract::{Request, State},
    handler::Handler,
    http::{header::AUTHORIZATION, Method},
    middleware::{self, Next},
    response::Response,
    routing::{on, MethodFilter, MethodRouter},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Delete,
}

impl Verb {
    pub fn filter(self) -> MethodFilter {
        match self {
            Verb::Get => MethodFilter::GET,
            Verb::Post => MethodFilter::POST,
            Verb::Delete => MethodFilter::DELETE,
        }
    }

    pub fn as_method(self) -> Method {
        match self {
            Verb::Get => Method::GET,
            Verb::Post => Method::POST,
            Verb::Delete => Method::DELETE,
        }
    }
}

/// One declared endpoint
pub struct RouteSpec {
    pub name: &'static str,
    pub verb: Verb,
    pub path: &'static str,
    /// Whether `path` is mounted under the configured API prefix
    pub prefixed: bool,
    pub requires: Requirement,
    endpoint: MethodRouter<AppState>,
}

impl RouteSpec {
    fn new<H, T>(
        name: &'static str,
        verb: Verb,
        path: &'static str,
        requires: Requirement,
        handler: H,
    ) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        Self {
            name,
            verb,
            path,
            prefixed: true,
            requires,
            endpoint: on(verb.filter(), handler),
        }
    }

    fn unprefixed(mut self) -> Self {
        self.prefixed = false;
        self
    }

    /// Full request path under `prefix`
    pub fn full_path(&self, prefix: &str) -> String {
        if self.prefixed {
            format!("{}{}", prefix, self.path)
        } else {
            self.path.to_string()
        }
    }
}

const BEARER: Requirement = Requirement::any_of(&[Capability::Bearer]);
const APPLICATION: Requirement = Requirement::any_of(&[Capability::Application]);
const VERIFIED: Requirement = Requirement::any_of(&[Capability::Verified]);
const WEBSOCKET: Requirement = Requirement::any_of(&[Capability::Bearer, Capability::Application]);

/// All HTTP endpoints
pub fn route_table() -> Vec<RouteSpec> {
    vec![
        RouteSpec::new("health", Verb::Get, "/health", Requirement::PUBLIC, handlers::health)
            .unprefixed(),
        RouteSpec::new("users.at_me", Verb::Get, "/users/@me", BEARER, handlers::at_me),
        RouteSpec::new(
            "users.at_me_application",
            Verb::Get,
            "/users/@me/application",
            APPLICATION,
            handlers::at_me_application,
        ),
        RouteSpec::new(
            "applications.create",
            Verb::Post,
            "/applications/create",
            BEARER,
            handlers::create_application,
        ),
        RouteSpec::new(
            "applications.delete",
            Verb::Delete,
            "/applications/delete",
            APPLICATION,
            handlers::delete_application,
        ),
        RouteSpec::new(
            "applications.regenerate",
            Verb::Get,
            "/applications/regenerate",
            APPLICATION,
            handlers::regenerate_application,
        ),
        RouteSpec::new(
            "members.dpy_modlog",
            Verb::Post,
            "/members/dpy/modlog",
            VERIFIED,
            handlers::post_dpy_modlog,
        ),
        RouteSpec::new(
            "websocket",
            Verb::Get,
            "/websocket",
            WEBSOCKET,
            websocket::websocket_handler,
        ),
    ]
}

#[derive(Clone)]
struct Guard {
    resolver: Arc<CredentialResolver>,
    requires: Requirement,
}

async fn require_capabilities(
    State(guard): State<Guard>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let credential = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let auth: Authenticated = guard.resolver.resolve(credential).await?;

    if !guard.requires.is_satisfied_by(&auth.capabilities) {
        debug!(
            principal_id = auth.principal.id,
            path = %request.uri().path(),
            granted = %auth.capabilities,
            "Missing required capability"
        );
        return Err(ApiError::Forbidden);
    }

    request.extensions_mut().insert(auth);
    Ok(next.run(request).await)
}

/// Build the router for every declared route
pub fn build_router(state: AppState, prefix: &str) -> Router {
    let mut router = Router::new();

    for spec in route_table() {
        let path = spec.full_path(prefix);

        let endpoint = if spec.requires.is_public() {
            spec.endpoint
        } else {
            let guard = Guard {
                resolver: state.resolver.clone(),
                requires: spec.requires,
            };
            spec.endpoint
                .route_layer(middleware::from_fn_with_state(guard, require_capabilities))
        };

        debug!(route = spec.name, method = %spec.verb.as_method(), path = %path, "Mounted route");
        router = router.route(&path, endpoint);
    }

    router.layer(CorsLayer::permissive()).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::storage::{AccountStore, MemoryStore};
    use axum::body::Body;
    use axum::http::{self, StatusCode};
    use tower::ServiceExt;

    fn app() -> (Arc<MemoryStore>, Router) {
        let store = Arc::new(MemoryStore::new());
        let config = ServerConfig::default();
        let state = AppState::new(store.clone(), &config);
        (store, build_router(state, &config.prefix))
    }

    fn request(spec: &RouteSpec, token: Option<&str>, body: &str) -> http::Request<Body> {
        let mut builder = http::Request::builder()
            .method(spec.verb.as_method())
            .uri(spec.full_path("/api"))
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, token);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn spec(name: &str) -> RouteSpec {
        route_table()
            .into_iter()
            .find(|spec| spec.name == name)
            .unwrap()
    }

    #[tokio::test]
    async fn test_every_route_is_reachable() {
        let (_store, app) = app();

        for spec in route_table() {
            let response = app.clone().oneshot(request(&spec, None, "{}")).await.unwrap();

            let expected = if spec.requires.is_public() {
                StatusCode::OK
            } else {
                StatusCode::UNAUTHORIZED
            };
            assert_eq!(response.status(), expected, "route {}", spec.name);
        }
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_any_origin() {
        let (_store, app) = app();

        let preflight = http::Request::builder()
            .method(Method::OPTIONS)
            .uri(spec("users.at_me").full_path("/api"))
            .header("origin", "https://dashboard.example")
            .header("access-control-request-method", "GET")
            .header("access-control-request-headers", "authorization")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(preflight).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "*"
        );

        // Plain responses carry the header too, errors included
        let mut unauthenticated = request(&spec("users.at_me"), None, "");
        unauthenticated
            .headers_mut()
            .insert("origin", "https://dashboard.example".parse().unwrap());
        let response = app.oneshot(unauthenticated).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "*"
        );
    }

    #[test]
    fn test_route_names_are_unique() {
        let table = route_table();
        for (i, spec) in table.iter().enumerate() {
            assert!(
                table[i + 1..].iter().all(|other| other.name != spec.name),
                "duplicate route {}",
                spec.name
            );
        }
    }

    #[tokio::test]
    async fn test_capability_mismatch_is_forbidden() {
        let (store, app) = app();
        let user = store.create_user(1001, "danny", false).await.unwrap();
        let app_record = store.create_application(user.uid, "modbot", "").await.unwrap();

        // bearer on an application route
        let response = app
            .clone()
            .oneshot(request(&spec("users.at_me_application"), Some(&user.bearer), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // unverified application on the verified route
        let response = app
            .clone()
            .oneshot(request(&spec("members.dpy_modlog"), Some(&app_record.token), "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(request(&spec("users.at_me"), Some(&user.bearer), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_application_validation() {
        let (store, app) = app();
        let user = store.create_user(1001, "danny", false).await.unwrap();
        let create = spec("applications.create");

        let response = app
            .clone()
            .oneshot(request(&create, Some(&user.bearer), "not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(request(&create, Some(&user.bearer), r#"{"name": "ab", "description": ""}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = r#"{"name": "modbot", "description": "relays mod actions"}"#;
        let response = app
            .clone()
            .oneshot(request(&create, Some(&user.bearer), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(request(&create, Some(&user.bearer), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_application_limit() {
        let (store, app) = app();
        let user = store.create_user(1001, "danny", false).await.unwrap();

        for i in 0..handlers::MAX_APPLICATIONS {
            store
                .create_application(user.uid, &format!("app-{}", i), "")
                .await
                .unwrap();
        }

        let body = r#"{"name": "one-too-many", "description": ""}"#;
        let response = app
            .oneshot(request(&spec("applications.create"), Some(&user.bearer), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_invalidates_token() {
        let (store, app) = app();
        let user = store.create_user(1001, "danny", false).await.unwrap();
        let record = store.create_application(user.uid, "modbot", "").await.unwrap();

        let response = app
            .clone()
            .oneshot(request(&spec("applications.delete"), Some(&record.token), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request(&spec("users.at_me_application"), Some(&record.token), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_regenerate_replaces_token() {
        let (store, app) = app();
        let user = store.create_user(1001, "danny", false).await.unwrap();
        let record = store.create_application(user.uid, "modbot", "").await.unwrap();

        let response = app
            .clone()
            .oneshot(request(&spec("applications.regenerate"), Some(&record.token), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request(&spec("users.at_me_application"), Some(&record.token), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_modlog_publish_without_subscribers() {
        let (store, app) = app();
        let user = store.create_user(1001, "danny", false).await.unwrap();
        let record = store.create_application(user.uid, "modbot", "").await.unwrap();
        store.set_application_verified(record.tid, true).await.unwrap();

        let response = app
            .oneshot(request(
                &spec("members.dpy_modlog"),
                Some(&record.token),
                r#"{"action": "ban"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report, serde_json::json!({"subscribers": 0, "successful": 0}));
    }
}
