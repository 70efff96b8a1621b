//! # API REST
//!
//! REST API for the CKD calculator.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (session cookie, JSON envelopes, status codes, CORS)
//!
//! Handlers only extract input, call into `ckd-core` and wrap the outcome. Every decision is
//! made in the core.

#![warn(rust_2018_idioms)]

pub mod error;
pub mod session;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use ckd_core::accounts::{LoginRequest, RegisterRequest, SearchPage, SearchQuery};
use ckd_core::authorization::{AssignSupervisorRequest, SubordinateRef, SupervisorRef};
use ckd_core::measurement::{
    BulkEntry, BulkOutcome, BulkResult, GuestMeasurementRequest, GuestOutcome, NotificationStatus,
    UserMeasurementRequest,
};
use ckd_core::models::MeasurementId;
use ckd_core::notify::{DeliveryReceipt, Notifier};
use ckd_core::password::Sha256PasswordHasher;
use ckd_core::patch::UserPatch;
use ckd_core::store::{MeasurementStore, UserStore};
use ckd_core::token::TokenService;
use ckd_core::{
    AccessLevel, AccountService, CoreConfig, FieldError, Gender, IdentityResolver, Measurement,
    MeasurementPipeline, User, UserId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use error::{ApiError, FailureBody};
use session::{expired_session_cookie, session_cookie, Caller};

pub type ApiResult<T> = Result<T, ApiError>;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub accounts: AccountService,
    pub pipeline: MeasurementPipeline,
    pub identity: IdentityResolver,
}

impl AppState {
    pub fn new(
        cfg: Arc<CoreConfig>,
        users: Arc<dyn UserStore>,
        measurements: Arc<dyn MeasurementStore>,
        tokens: Arc<dyn TokenService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            accounts: AccountService::new(
                users.clone(),
                measurements.clone(),
                tokens.clone(),
                Arc::new(Sha256PasswordHasher),
            ),
            pipeline: MeasurementPipeline::new(users.clone(), measurements, notifier, cfg),
            identity: IdentityResolver::new(tokens, users),
        }
    }
}

// ============================================================================
// ENVELOPES AND ADAPTER-ONLY REQUEST TYPES
// ============================================================================

/// `{"status":"success", ...body}`
#[derive(Debug, Serialize)]
pub struct Success<T> {
    status: &'static str,
    #[serde(flatten)]
    body: T,
}

fn success<T: Serialize>(body: T) -> Json<Success<T>> {
    Json(Success {
        status: "success",
        body,
    })
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct MessageBody {
    pub message: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct UserBody {
    pub user: User,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct UsersBody {
    pub users: Vec<User>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct MeasurementBody {
    pub measurement: Measurement,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct MeasurementsBody {
    pub measurements: Vec<Measurement>,
}

/// Edit the user registered under `email`.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct EditUserRequest {
    pub email: String,
    #[serde(default)]
    pub changes: UserPatch,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CsvCalculatorRequest {
    pub entries: Vec<BulkEntry>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct PatientsMeasurementsQuery {
    pub email: Option<String>,
    pub nhs_number: Option<i64>,
}

// ============================================================================
// ROUTER
// ============================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        register,
        login,
        logout,
        user_info,
        user_measurements,
        user_measure,
        guest_measure,
        list_managers,
        list_clinicians,
        list_subordinates,
        edit_user,
        search,
        csv_calculator,
        assign_supervisor,
        patients_measurements,
    ),
    components(schemas(
        FailureBody,
        FieldError,
        MessageBody,
        UserBody,
        UsersBody,
        MeasurementBody,
        MeasurementsBody,
        EditUserRequest,
        CsvCalculatorRequest,
        User,
        UserId,
        MeasurementId,
        Measurement,
        AccessLevel,
        Gender,
        UserPatch,
        RegisterRequest,
        LoginRequest,
        SearchQuery,
        SearchPage,
        UserMeasurementRequest,
        GuestMeasurementRequest,
        GuestOutcome,
        NotificationStatus,
        DeliveryReceipt,
        BulkEntry,
        BulkResult,
        BulkOutcome,
        AssignSupervisorRequest,
        SupervisorRef,
        SubordinateRef,
    ))
)]
pub struct ApiDoc;

/// Build the full REST router with Swagger UI and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/user/logout", post(logout))
        .route("/api/user/info", get(user_info))
        .route("/api/user/measurements", get(user_measurements))
        .route("/api/user/measure", post(user_measure))
        .route("/api/guest/measure", post(guest_measure))
        .route("/api/admin/managers", get(list_managers))
        .route("/api/admin/clinicians", get(list_clinicians))
        .route("/api/admin/subordinates", get(list_subordinates))
        .route("/api/admin/edit", post(edit_user))
        .route("/api/admin/search", get(search))
        .route("/api/admin/csv_calculator", post(csv_calculator))
        .route("/api/admin/assign_supervisor", post(assign_supervisor))
        .route("/api/admin/patients_measurements", get(patients_measurements))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// HANDLERS
// ============================================================================

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = MessageBody)
    )
)]
#[axum::debug_handler(state = AppState)]
async fn health() -> Json<Success<MessageBody>> {
    success(MessageBody {
        message: "CKD calculator is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/api/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Patient registered", body = UserBody),
        (status = 400, description = "Invalid fields", body = FailureBody),
        (status = 409, description = "Email or NHS number already registered", body = FailureBody)
    )
)]
#[axum::debug_handler(state = AppState)]
async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = state.accounts.register(req)?;
    Ok((StatusCode::CREATED, success(UserBody { user })))
}

#[utoipa::path(
    post,
    path = "/api/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; session cookie set", body = UserBody),
        (status = 400, description = "Bad credentials or identifiers", body = FailureBody)
    )
)]
#[axum::debug_handler(state = AppState)]
async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = state.accounts.login(&req)?;
    let cookie = session_cookie(&session.token, session.extended);
    Ok((
        [(header::SET_COOKIE, cookie)],
        success(UserBody { user: session.user }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/user/logout",
    responses(
        (status = 200, description = "Session cookie cleared", body = MessageBody)
    )
)]
#[axum::debug_handler(state = AppState)]
async fn logout() -> impl IntoResponse {
    (
        [(header::SET_COOKIE, expired_session_cookie())],
        success(MessageBody {
            message: "Logged out".into(),
        }),
    )
}

#[utoipa::path(
    get,
    path = "/api/user/info",
    responses(
        (status = 200, description = "The caller's profile", body = UserBody),
        (status = 401, description = "Not logged in", body = FailureBody)
    )
)]
#[axum::debug_handler(state = AppState)]
async fn user_info(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Json<Success<UserBody>>> {
    Ok(success(UserBody {
        user: state.accounts.current_user(&caller),
    }))
}

#[utoipa::path(
    get,
    path = "/api/user/measurements",
    responses(
        (status = 200, description = "The caller's measurements", body = MeasurementsBody),
        (status = 401, description = "Not logged in", body = FailureBody)
    )
)]
#[axum::debug_handler(state = AppState)]
async fn user_measurements(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Json<Success<MeasurementsBody>>> {
    let measurements = state.accounts.own_measurements(&caller)?;
    Ok(success(MeasurementsBody { measurements }))
}

#[utoipa::path(
    post,
    path = "/api/user/measure",
    request_body = UserMeasurementRequest,
    responses(
        (status = 200, description = "Measurement stored", body = MeasurementBody),
        (status = 400, description = "Invalid input or implausible result", body = FailureBody),
        (status = 401, description = "Not logged in", body = FailureBody),
        (status = 403, description = "Not allowed to measure for this patient", body = FailureBody),
        (status = 404, description = "Patient not found", body = FailureBody)
    )
)]
#[axum::debug_handler(state = AppState)]
async fn user_measure(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<UserMeasurementRequest>,
) -> ApiResult<Json<Success<MeasurementBody>>> {
    let measurement = state.pipeline.measure_for_user(&caller, &req)?;
    Ok(success(MeasurementBody { measurement }))
}

#[utoipa::path(
    post,
    path = "/api/guest/measure",
    request_body = GuestMeasurementRequest,
    responses(
        (status = 200, description = "eGFR result, nothing stored", body = GuestOutcome),
        (status = 400, description = "Invalid input or implausible result", body = FailureBody)
    )
)]
#[axum::debug_handler(state = AppState)]
async fn guest_measure(
    State(state): State<AppState>,
    Json(req): Json<GuestMeasurementRequest>,
) -> ApiResult<Json<Success<GuestOutcome>>> {
    Ok(success(state.pipeline.measure_guest(&req)?))
}

#[utoipa::path(
    get,
    path = "/api/admin/managers",
    responses(
        (status = 200, description = "All managers", body = UsersBody),
        (status = 403, description = "Sysadmin only", body = FailureBody)
    )
)]
#[axum::debug_handler(state = AppState)]
async fn list_managers(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Json<Success<UsersBody>>> {
    let users = state.accounts.list_by_access(&caller, AccessLevel::Manager)?;
    Ok(success(UsersBody { users }))
}

#[utoipa::path(
    get,
    path = "/api/admin/clinicians",
    responses(
        (status = 200, description = "All clinicians", body = UsersBody),
        (status = 403, description = "Manager or above only", body = FailureBody)
    )
)]
#[axum::debug_handler(state = AppState)]
async fn list_clinicians(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Json<Success<UsersBody>>> {
    let users = state.accounts.list_by_access(&caller, AccessLevel::Clinician)?;
    Ok(success(UsersBody { users }))
}

#[utoipa::path(
    get,
    path = "/api/admin/subordinates",
    responses(
        (status = 200, description = "Users supervised by the caller", body = UsersBody),
        (status = 403, description = "Patients have no subordinates", body = FailureBody)
    )
)]
#[axum::debug_handler(state = AppState)]
async fn list_subordinates(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Json<Success<UsersBody>>> {
    let users = state.accounts.subordinates(&caller)?;
    Ok(success(UsersBody { users }))
}

#[utoipa::path(
    post,
    path = "/api/admin/edit",
    request_body = EditUserRequest,
    responses(
        (status = 200, description = "Updated profile", body = UserBody),
        (status = 400, description = "Invalid fields", body = FailureBody),
        (status = 403, description = "Not allowed to edit this user or field", body = FailureBody),
        (status = 404, description = "Target user not found", body = FailureBody),
        (status = 409, description = "Identifier already in use", body = FailureBody)
    )
)]
#[axum::debug_handler(state = AppState)]
async fn edit_user(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<EditUserRequest>,
) -> ApiResult<Json<Success<UserBody>>> {
    let user = state.accounts.edit_user(&caller, &req.email, &req.changes)?;
    Ok(success(UserBody { user }))
}

#[utoipa::path(
    get,
    path = "/api/admin/search",
    params(SearchQuery),
    responses(
        (status = 200, description = "Matching users", body = SearchPage),
        (status = 400, description = "Bad range", body = FailureBody),
        (status = 403, description = "Patients may not search", body = FailureBody)
    )
)]
#[axum::debug_handler(state = AppState)]
async fn search(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Success<SearchPage>>> {
    Ok(success(state.accounts.search(&caller, &query)?))
}

#[utoipa::path(
    post,
    path = "/api/admin/csv_calculator",
    request_body = CsvCalculatorRequest,
    responses(
        (status = 200, description = "Results in input order", body = BulkOutcome),
        (status = 400, description = "Batch rejected; nothing stored", body = FailureBody),
        (status = 403, description = "Clinicians only", body = FailureBody)
    )
)]
#[axum::debug_handler(state = AppState)]
async fn csv_calculator(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<CsvCalculatorRequest>,
) -> ApiResult<Json<Success<BulkOutcome>>> {
    Ok(success(state.pipeline.bulk_calculate(&caller, &req.entries)?))
}

#[utoipa::path(
    post,
    path = "/api/admin/assign_supervisor",
    request_body = AssignSupervisorRequest,
    responses(
        (status = 200, description = "Updated subordinate", body = UserBody),
        (status = 400, description = "Malformed request or supervision cycle", body = FailureBody),
        (status = 403, description = "Role too low for this assignment", body = FailureBody),
        (status = 404, description = "Supervisor or subordinate not found", body = FailureBody)
    )
)]
#[axum::debug_handler(state = AppState)]
async fn assign_supervisor(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<AssignSupervisorRequest>,
) -> ApiResult<Json<Success<UserBody>>> {
    let user = state.accounts.assign_supervisor(&caller, &req)?;
    Ok(success(UserBody { user }))
}

#[utoipa::path(
    get,
    path = "/api/admin/patients_measurements",
    params(PatientsMeasurementsQuery),
    responses(
        (status = 200, description = "The patient's measurements", body = MeasurementsBody),
        (status = 400, description = "Exactly one of email or NHS number required", body = FailureBody),
        (status = 403, description = "Not this clinician's patient", body = FailureBody),
        (status = 404, description = "Patient not found", body = FailureBody)
    )
)]
#[axum::debug_handler(state = AppState)]
async fn patients_measurements(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(query): Query<PatientsMeasurementsQuery>,
) -> ApiResult<Json<Success<MeasurementsBody>>> {
    let measurements =
        state
            .accounts
            .patients_measurements(&caller, query.email, query.nhs_number)?;
    Ok(success(MeasurementsBody { measurements }))
}
