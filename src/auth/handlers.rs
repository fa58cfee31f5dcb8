use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{LoginRequest, RegisterRequest, TokenResponse},
        password::{dummy_verify_blocking, hash_password_blocking, verify_password_blocking},
        repo_types::NewUser,
    },
    error::ApiError,
    state::AppState,
    storage::StoreError,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    match login_flow(&state, payload).await {
        Ok(token) => (StatusCode::OK, Json(TokenResponse { token })).into_response(),
        Err(e) => e.render(state.config.expose_error_details),
    }
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    match register_flow(&state, payload).await {
        Ok(token) => (StatusCode::CREATED, Json(TokenResponse { token })).into_response(),
        Err(e) => e.render(state.config.expose_error_details),
    }
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    warn!(error = %rejection.body_text(), "rejected request body");
    ApiError::Validation(rejection.body_text())
}

async fn login_flow(
    state: &AppState,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<String, ApiError> {
    let Json(req) = payload.map_err(bad_body)?;
    let creds = req.validate()?;

    info!(email = %creds.email, "login requested");

    let user = match state.store.find_by_email(&creds.email).await {
        Ok(Some(u)) => u,
        Ok(None) | Err(StoreError::NotFound) => {
            dummy_verify_blocking(creds.password).await;
            warn!(email = %creds.email, "login unknown email");
            return Err(ApiError::Authentication);
        }
        Err(e) => {
            error!(error = %e, email = %creds.email, "find_by_email failed");
            return Err(ApiError::Dependency(e.to_string()));
        }
    };

    let ok = verify_password_blocking(creds.password, user.password_hash.clone())
        .await
        .map_err(|e| {
            error!(error = %e, user_id = %user.id, "verify_password failed");
            ApiError::Dependency(e.to_string())
        })?;

    if !ok {
        warn!(email = %creds.email, user_id = %user.id, "login invalid password");
        return Err(ApiError::Authentication);
    }

    let token = state
        .issuer
        .issue_token(&user.id.to_string())
        .await
        .map_err(|e| {
            error!(error = %e, user_id = %user.id, "issue_token failed");
            ApiError::Dependency(e.to_string())
        })?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(token)
}

async fn register_flow(
    state: &AppState,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<String, ApiError> {
    let Json(req) = payload.map_err(bad_body)?;
    let reg = req.validate()?;

    // Early exit before paying for a hash; the insert below is what actually
    // guarantees uniqueness.
    match state.store.find_by_email(&reg.email).await {
        Ok(Some(_)) => {
            warn!(email = %reg.email, "email already registered");
            return Err(ApiError::Conflict);
        }
        Ok(None) | Err(StoreError::NotFound) => {}
        Err(e) => {
            error!(error = %e, email = %reg.email, "find_by_email failed");
            return Err(ApiError::Dependency(e.to_string()));
        }
    }

    let id = Uuid::new_v4();
    let password_hash = hash_password_blocking(reg.password).await.map_err(|e| {
        error!(error = %e, "hash_password failed");
        ApiError::Dependency(e.to_string())
    })?;

    let user = state
        .store
        .insert_user(NewUser {
            id,
            email: reg.email,
            password_hash,
            username: reg.username,
        })
        .await
        .map_err(|e| match e {
            StoreError::Conflict => {
                warn!(user_id = %id, "lost registration race on email");
                ApiError::Conflict
            }
            other => {
                error!(error = %other, "insert_user failed");
                ApiError::Dependency(other.to_string())
            }
        })?;

    let token = state
        .issuer
        .issue_token(&user.id.to_string())
        .await
        .map_err(|e| {
            warn!(error = %e, user_id = %user.id, "user registered but token issuance failed");
            ApiError::Dependency(e.to_string())
        })?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{
            repo_types::User,
            token::{TokenError, TokenIssuer},
        },
        error::{ErrorEnvelope, INVALID_CREDENTIALS},
        state::test_config,
        storage::{CredentialStore, MemoryCredentialStore},
    };
    use async_trait::async_trait;
    use axum::{body::Body, http::Request};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use tower::ServiceExt;

    /// Wraps the memory store and counts every call.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryCredentialStore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialStore for CountingStore {
        async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.find_by_email(email).await
        }
        async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.insert_user(user).await
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct BrokenStore(StoreError);

    #[async_trait]
    impl CredentialStore for BrokenStore {
        async fn find_by_email(&self, _email: &str) -> Result<Option<User>, StoreError> {
            Err(match &self.0 {
                StoreError::NotFound => StoreError::NotFound,
                StoreError::Conflict => StoreError::Conflict,
                StoreError::Backend(m) => StoreError::Backend(m.clone()),
            })
        }
        async fn insert_user(&self, _user: NewUser) -> Result<User, StoreError> {
            Err(StoreError::Backend("write refused".into()))
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Backend("down".into()))
        }
    }

    struct FailingIssuer;

    #[async_trait]
    impl TokenIssuer for FailingIssuer {
        async fn issue_token(&self, _uid: &str) -> Result<String, TokenError> {
            Err(TokenError::Key("no key".into()))
        }
    }

    fn state_with(store: Arc<dyn CredentialStore>) -> AppState {
        let base = AppState::fake();
        AppState::from_parts(Arc::new(test_config()), store, base.issuer)
    }

    fn app(state: AppState) -> Router {
        auth_routes().with_state(state)
    }

    async fn post_json(app: &Router, path: &str, body: serde_json::Value) -> (StatusCode, Vec<u8>) {
        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    fn token_of(body: &[u8]) -> String {
        serde_json::from_slice::<TokenResponse>(body).unwrap().token
    }

    fn envelope_of(body: &[u8]) -> ErrorEnvelope {
        serde_json::from_slice(body).unwrap()
    }

    fn creds(email: &str, password: &str) -> serde_json::Value {
        serde_json::json!({ "email": email, "password": password })
    }

    #[tokio::test]
    async fn missing_fields_are_rejected_without_store_access() {
        let store = Arc::new(CountingStore::default());
        let app = app(state_with(store.clone()));

        for path in ["/login", "/register"] {
            for body in [
                serde_json::json!({}),
                serde_json::json!({ "email": "a@example.com" }),
                serde_json::json!({ "password": "password123" }),
                serde_json::json!({ "email": "", "password": "password123" }),
            ] {
                let (status, bytes) = post_json(&app, path, body).await;
                assert_eq!(status, StatusCode::BAD_REQUEST, "{path}");
                let env = envelope_of(&bytes);
                assert_eq!(env.status, "Bad Request");
                assert_eq!(env.error.as_deref(), Some("missing required fields"));
            }
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let app = app(AppState::fake());
        let res = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/login")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn register_then_login_succeeds() {
        let app = app(AppState::fake());

        let (status, body) =
            post_json(&app, "/register", creds("new@example.com", "hunter2hunter2")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(!token_of(&body).is_empty());

        let (status, body) =
            post_json(&app, "/login", creds("NEW@example.com ", "hunter2hunter2")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!token_of(&body).is_empty());
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let app = app(AppState::fake());
        post_json(&app, "/register", creds("known@example.com", "right-password")).await;

        let (unknown_status, unknown_body) =
            post_json(&app, "/login", creds("ghost@example.com", "right-password")).await;
        let (wrong_status, wrong_body) =
            post_json(&app, "/login", creds("known@example.com", "wrong-password")).await;

        assert_eq!(unknown_status, StatusCode::FORBIDDEN);
        assert_eq!(wrong_status, StatusCode::FORBIDDEN);
        assert_eq!(unknown_body, wrong_body);
        assert_eq!(
            envelope_of(&unknown_body).error.as_deref(),
            Some(INVALID_CREDENTIALS)
        );
    }

    #[tokio::test]
    async fn malformed_login_email_is_bad_credentials() {
        let store = Arc::new(CountingStore::default());
        let app = app(state_with(store.clone()));

        let (status, body) = post_json(&app, "/login", creds("not-an-email", "password-123")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(envelope_of(&body).error.as_deref(), Some(INVALID_CREDENTIALS));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        let (status, _) = post_json(&app, "/register", creds("not-an-email", "password-123")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn store_not_found_is_an_authentication_failure() {
        let app = app(state_with(Arc::new(BrokenStore(StoreError::NotFound))));
        let (status, _) = post_json(&app, "/login", creds("a@example.com", "whatever-pass")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn store_outage_is_a_server_error_and_hides_details() {
        let app = app(state_with(Arc::new(BrokenStore(StoreError::Backend(
            "permission denied on users".into(),
        )))));
        let (status, body) =
            post_json(&app, "/login", creds("a@example.com", "whatever-pass")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let env = envelope_of(&body);
        assert_eq!(env.status, "Internal Server Error");
        assert!(env.error.is_none());

        let (status, _) =
            post_json(&app, "/register", creds("a@example.com", "whatever-pass")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn duplicate_registration_is_a_conflict() {
        let store = Arc::new(MemoryCredentialStore::new());
        let app = app(state_with(store.clone()));

        let (status, _) =
            post_json(&app, "/register", creds("dup@example.com", "first-password")).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) =
            post_json(&app, "/register", creds("Dup@Example.com", "second-password")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(envelope_of(&body).code, Some(1003));
        assert_eq!(store.len().await, 1);

        // first password still works
        let (status, _) =
            post_json(&app, "/login", creds("dup@example.com", "first-password")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn concurrent_registrations_admit_exactly_one() {
        let store = Arc::new(MemoryCredentialStore::new());
        let app = app(state_with(store.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let app = app.clone();
                tokio::spawn(async move {
                    post_json(
                        &app,
                        "/register",
                        creds("race@example.com", &format!("password-{i}")),
                    )
                    .await
                    .0
                })
            })
            .collect();

        let mut created = 0;
        for t in tasks {
            match t.await.unwrap() {
                StatusCode::CREATED => created += 1,
                other => assert_eq!(other, StatusCode::CONFLICT),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn issuer_failure_after_insert_keeps_the_user() {
        let store = Arc::new(MemoryCredentialStore::new());
        let state = AppState::from_parts(
            Arc::new(test_config()),
            store.clone(),
            Arc::new(FailingIssuer),
        );
        let app = app(state);

        let (status, _) =
            post_json(&app, "/register", creds("tokenless@example.com", "password-ok")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(store
            .find_by_email("tokenless@example.com")
            .await
            .unwrap()
            .is_some());

        let (status, _) =
            post_json(&app, "/login", creds("tokenless@example.com", "password-ok")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn short_password_is_rejected_on_register() {
        let app = app(AppState::fake());
        let (status, body) = post_json(&app, "/register", creds("short@example.com", "abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(envelope_of(&body).error.unwrap().contains("at least 8"));
    }
}
