//! REST + WebSocket API (Axum)
//!
//! - `/auth/*`: registration, login and the current student
//! - `/students`: public roster listing and profile edits
//! - `/payments/*`: simulated fee payment and history
//! - `/ws`: live `paymentUpdate` events for roster views

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        FromRequest, Request, State,
    },
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Extension, Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use utoipa::{OpenApi, ToSchema};

use crate::auth::{bearer_token, normalize_email, AuthService, AuthSession, LoginRequest, RegisterRequest, TokenKeys};
use crate::broadcast::{Broadcaster, Subscription};
use crate::error::AppError;
use crate::models::{PaymentMethod, PaymentRecord, PaymentUpdate, ServerEvent, Student, StudentView};
use crate::payments::{PaymentProcessor, PaymentReceipt, PaymentRequest};
use crate::storage::{ProfileChanges, StoreError, StudentStore};

/// Shared app state for handlers (cheap to clone)
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StudentStore>,
    pub auth: Arc<AuthService>,
    pub payments: Arc<PaymentProcessor>,
    pub broadcaster: Broadcaster,
}

impl AppState {
    pub fn new(store: Arc<dyn StudentStore>, keys: TokenKeys, bcrypt_cost: u32, broadcaster: Broadcaster) -> Self {
        Self {
            auth: Arc::new(AuthService::new(store.clone(), keys, bcrypt_cost)),
            payments: Arc::new(PaymentProcessor::new(store.clone(), broadcaster.clone())),
            store,
            broadcaster,
        }
    }
}

/// JSON body extractor whose rejections become `ValidationError`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// The authenticated caller, re-read from the store by [`auth_middleware`].
#[derive(Clone)]
pub struct CurrentStudent(pub Student);

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct StudentEnvelope {
    pub student: StudentView,
}

#[derive(Deserialize, Debug, Clone, Default, ToSchema)]
pub struct ProfileRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub subscribers: usize,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        register_handler,
        login_handler,
        me_handler,
        list_students_handler,
        update_profile_handler,
        process_payment_handler,
        payment_history_handler,
        health_handler,
    ),
    components(schemas(
        RegisterRequest,
        LoginRequest,
        AuthSession,
        StudentView,
        StudentEnvelope,
        ProfileRequest,
        PaymentRequest,
        PaymentReceipt,
        PaymentRecord,
        PaymentMethod,
        PaymentUpdate,
        HealthResponse,
    ))
)]
pub struct ApiDoc;

async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_owned);

    let student = state.auth.verify(token.as_deref()).await?;

    req.extensions_mut().insert(CurrentStudent(student));
    Ok(next.run(req).await)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    match origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => cors.allow_origin(origin),
        Some(Err(_)) => {
            warn!("Invalid CORS origin, allowing any origin");
            cors.allow_origin(Any)
        }
        None => cors.allow_origin(Any),
    }
}

/// Create Axum router with every endpoint. `cors_origin` of `None` allows any origin.
pub fn create_router(state: AppState, cors_origin: Option<&str>) -> Router {
    let auth_routes = Router::new()
        .route("/auth/me", get(me_handler))
        .route("/students/profile", put(update_profile_handler))
        .route("/payments/process", post(process_payment_handler))
        .route("/payments/history", get(payment_history_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/students", get(list_students_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api-docs/openapi.json", get(openapi_handler))
        .merge(auth_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors_origin)),
        )
        .with_state(state)
}

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Student registered", body = AuthSession),
        (status = 400, description = "DuplicateEmail or ValidationError")
    )
)]
async fn register_handler(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthSession>), AppError> {
    let session = state.auth.register(payload).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthSession),
        (status = 400, description = "InvalidCredentials")
    )
)]
async fn login_handler(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<Json<AuthSession>, AppError> {
    Ok(Json(state.auth.login(payload).await?))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current student", body = StudentEnvelope),
        (status = 401, description = "Unauthenticated")
    )
)]
async fn me_handler(Extension(CurrentStudent(student)): Extension<CurrentStudent>) -> Json<StudentEnvelope> {
    Json(StudentEnvelope {
        student: student.view(),
    })
}

#[utoipa::path(
    get,
    path = "/students",
    responses((status = 200, description = "Every student, registration order", body = [StudentView]))
)]
async fn list_students_handler(State(state): State<AppState>) -> Result<Json<Vec<StudentView>>, AppError> {
    let students = state.store.list_students().await?;
    Ok(Json(students.iter().map(StudentView::from).collect()))
}

#[utoipa::path(
    put,
    path = "/students/profile",
    request_body = ProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = StudentEnvelope),
        (status = 400, description = "EmailInUse or ValidationError"),
        (status = 404, description = "StudentNotFound")
    )
)]
async fn update_profile_handler(
    State(state): State<AppState>,
    Extension(CurrentStudent(student)): Extension<CurrentStudent>,
    AppJson(payload): AppJson<ProfileRequest>,
) -> Result<Json<StudentEnvelope>, AppError> {
    // Blank fields keep their current value
    let name = payload
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    let email = payload
        .email
        .map(|e| normalize_email(&e))
        .filter(|e| !e.is_empty());
    if email.as_ref().is_some_and(|e| !e.contains('@')) {
        return Err(AppError::Validation("A valid email is required".into()));
    }

    let updated = state
        .store
        .update_profile(student.id, &ProfileChanges { name, email })
        .await
        .map_err(|e| match e {
            StoreError::EmailTaken => AppError::EmailInUse,
            other => other.into(),
        })?;

    info!(student_id = %updated.id, "profile updated");
    Ok(Json(StudentEnvelope {
        student: updated.view(),
    }))
}

#[utoipa::path(
    post,
    path = "/payments/process",
    request_body = PaymentRequest,
    responses(
        (status = 200, description = "Payment recorded", body = PaymentReceipt),
        (status = 400, description = "ValidationError"),
        (status = 401, description = "Unauthenticated"),
        (status = 404, description = "StudentNotFound")
    )
)]
async fn process_payment_handler(
    State(state): State<AppState>,
    Extension(CurrentStudent(student)): Extension<CurrentStudent>,
    AppJson(payload): AppJson<PaymentRequest>,
) -> Result<Json<PaymentReceipt>, AppError> {
    Ok(Json(state.payments.process(student.id, payload).await?))
}

#[utoipa::path(
    get,
    path = "/payments/history",
    responses(
        (status = 200, description = "Payments, oldest first", body = [PaymentRecord]),
        (status = 401, description = "Unauthenticated")
    )
)]
async fn payment_history_handler(
    Extension(CurrentStudent(student)): Extension<CurrentStudent>,
) -> Json<Vec<PaymentRecord>> {
    Json(student.payment_history)
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        subscribers: state.broadcaster.subscriber_count(),
    })
}

async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Upgrades to a WebSocket that streams every payment update to the client
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    // Subscribe before the handshake completes so nothing published in between is missed
    let subscription = state.broadcaster.subscribe();
    ws.on_upgrade(move |socket| forward_updates(socket, subscription))
}

async fn forward_updates(socket: WebSocket, mut subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();
    debug!("roster subscriber connected");

    loop {
        tokio::select! {
            update = subscription.next() => {
                let Some(update) = update else { break };
                let frame = match serde_json::to_string(&ServerEvent::PaymentUpdate(update)) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "failed to encode payment update");
                        continue;
                    }
                };
                if sender.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }

            // Clients only listen; anything but a close frame is ignored
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    subscription.cancel();
    debug!("roster subscriber disconnected");
}
