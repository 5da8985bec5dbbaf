use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{Days, Local, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use larder_core::Database;
use larder_core::jobs::{JobSettings, TickReport};
use larder_core::ledger::RestockSummary;
use larder_core::models::{
    CreateAs, DailyMealSuggestion, Ingredient, MealCookedPrompt, MealPlan, NewIngredient,
    PantryLine, PromptAnswer, PromptStatus, Recipe, RecipeDetail, ShoppingLine,
    ShoppingRegeneration, SuggestionContext,
};
use larder_core::notify::PushNotifier;
use larder_core::suggestions::PantryMatcher;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Database>>,
    notifier: Arc<dyn PushNotifier>,
    settings: JobSettings,
    api_key: Option<String>,
}

impl AppState {
    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn matcher(&self) -> PantryMatcher {
        PantryMatcher {
            recent_days: self.settings.suggestion_recent_days,
        }
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct CreateIngredientRequest {
    name: String,
    unit: String,
    category: Option<String>,
    #[serde(default)]
    global: bool,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

#[derive(Deserialize)]
struct AddQuantityRequest {
    ingredient_id: i64,
    delta: Decimal,
    unit: Option<String>,
}

#[derive(Deserialize)]
struct SetQuantityRequest {
    quantity: Decimal,
    unit: Option<String>,
}

#[derive(Deserialize)]
struct GenerateShoppingRequest {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

#[derive(Deserialize)]
struct CheckRequest {
    checked: bool,
}

#[derive(Deserialize)]
struct PlanRequest {
    recipe_id: i64,
    date: NaiveDate,
}

#[derive(Deserialize)]
struct RangeQuery {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

#[derive(Deserialize)]
struct PromptQuery {
    status: Option<String>,
}

#[derive(Deserialize)]
struct AnswerRequest {
    answer: PromptAnswer,
}

#[derive(Deserialize)]
struct TickQuery {
    date: Option<NaiveDate>,
}

#[derive(Serialize)]
struct SuggestionResponse {
    suggestion: DailyMealSuggestion,
    created: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                tracing::error!(error = %format!("{err:#}"), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<larder_core::Error> for ApiError {
    fn from(err: larder_core::Error) -> Self {
        match err {
            larder_core::Error::InvalidInput(_) => Self::BadRequest(err.to_string()),
            larder_core::Error::NotFound(_) => Self::NotFound(err.to_string()),
            other => Self::Internal(other.into()),
        }
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

// --- Ingredients ---

async fn create_ingredient(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<CreateIngredientRequest>,
) -> Result<Json<Ingredient>, ApiError> {
    let mut new = NewIngredient::new(req.name, req.unit);
    if let Some(category) = req.category {
        new = new.with_category(category);
    }
    let db = state.db();
    db.get_user(user_id)?;
    let ingredient = if req.global {
        db.seed_global_ingredient(&new)?
    } else {
        db.resolve_or_create_ingredient(user_id, &new, CreateAs::Private)?
    };
    Ok(Json(ingredient))
}

async fn list_ingredients(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Ingredient>>, ApiError> {
    let db = state.db();
    db.get_user(user_id)?;
    Ok(Json(db.list_visible_ingredients(user_id, query.q.as_deref())?))
}

// --- Pantry ---

async fn list_pantry(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<PantryLine>>, ApiError> {
    let db = state.db();
    db.get_user(user_id)?;
    Ok(Json(db.list_pantry(user_id)?))
}

async fn add_pantry(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<AddQuantityRequest>,
) -> Result<Json<PantryLine>, ApiError> {
    let db = state.db();
    let unit = match req.unit {
        Some(unit) => unit,
        None => db.get_ingredient(req.ingredient_id)?.unit,
    };
    Ok(Json(db.add_pantry_quantity(
        user_id,
        req.ingredient_id,
        req.delta,
        &unit,
    )?))
}

async fn set_pantry(
    State(state): State<AppState>,
    Path((user_id, ingredient_id)): Path<(i64, i64)>,
    Json(req): Json<SetQuantityRequest>,
) -> Result<Json<PantryLine>, ApiError> {
    let db = state.db();
    let unit = match req.unit {
        Some(unit) => unit,
        None => db.get_ingredient(ingredient_id)?.unit,
    };
    Ok(Json(db.set_pantry_quantity(
        user_id,
        ingredient_id,
        req.quantity,
        &unit,
    )?))
}

// --- Shopping ---

async fn list_shopping(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<ShoppingLine>>, ApiError> {
    let db = state.db();
    db.get_user(user_id)?;
    Ok(Json(db.list_shopping(user_id)?))
}

async fn add_shopping(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<AddQuantityRequest>,
) -> Result<Json<ShoppingLine>, ApiError> {
    let db = state.db();
    let unit = match req.unit {
        Some(unit) => unit,
        None => db.get_ingredient(req.ingredient_id)?.unit,
    };
    Ok(Json(db.add_shopping_quantity(
        user_id,
        req.ingredient_id,
        req.delta,
        &unit,
    )?))
}

/// Covers a week from `from` (default today) unless `to` is given.
async fn generate_shopping(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<GenerateShoppingRequest>,
) -> Result<Json<ShoppingRegeneration>, ApiError> {
    let from = req.from.unwrap_or_else(today);
    let to = req
        .to
        .unwrap_or_else(|| from.checked_add_days(Days::new(6)).unwrap_or(NaiveDate::MAX));
    Ok(Json(state.db().generate_shopping_list(user_id, from, to)?))
}

async fn check_shopping(
    State(state): State<AppState>,
    Path((user_id, ingredient_id)): Path<(i64, i64)>,
    Json(req): Json<CheckRequest>,
) -> Result<Json<ShoppingLine>, ApiError> {
    Ok(Json(state.db().set_shopping_checked(
        user_id,
        ingredient_id,
        req.checked,
    )?))
}

async fn restock(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<RestockSummary>, ApiError> {
    Ok(Json(state.db().restock_from_shopping(user_id)?))
}

// --- Recipes and plans ---

async fn list_recipes(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<Recipe>>, ApiError> {
    let db = state.db();
    db.get_user(user_id)?;
    Ok(Json(db.list_recipes(user_id)?))
}

async fn get_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RecipeDetail>, ApiError> {
    Ok(Json(state.db().get_recipe_detail(id)?))
}

async fn list_plans(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<MealPlan>>, ApiError> {
    let from = range.from.unwrap_or_else(today);
    let to = range
        .to
        .unwrap_or_else(|| from.checked_add_days(Days::new(6)).unwrap_or(NaiveDate::MAX));
    let db = state.db();
    db.get_user(user_id)?;
    Ok(Json(db.list_meal_plans(user_id, from, to)?))
}

async fn create_plan(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<PlanRequest>,
) -> Result<(StatusCode, Json<MealPlan>), ApiError> {
    let plan = state.db().plan_meal(user_id, req.recipe_id, req.date)?;
    Ok((StatusCode::CREATED, Json(plan)))
}

async fn validate_plan(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MealPlan>, ApiError> {
    Ok(Json(state.db().validate_meal_plan(id)?))
}

// --- Suggestions ---

/// Today's suggestion, created on first request. `201` when this call
/// created it.
async fn today_suggestion(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<(StatusCode, Json<SuggestionResponse>), ApiError> {
    let matcher = state.matcher();
    let (suggestion, created) = state.db().generate_suggestion(
        user_id,
        today(),
        SuggestionContext::TodayAuto,
        &matcher,
    )?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(SuggestionResponse { suggestion, created })))
}

async fn accept_suggestion(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DailyMealSuggestion>, ApiError> {
    Ok(Json(state.db().accept_suggestion(id)?))
}

async fn dismiss_suggestion(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DailyMealSuggestion>, ApiError> {
    Ok(Json(state.db().dismiss_suggestion(id)?))
}

// --- Prompts ---

async fn list_prompts(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(query): Query<PromptQuery>,
) -> Result<Json<Vec<MealCookedPrompt>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<PromptStatus>)
        .transpose()?;
    let db = state.db();
    db.get_user(user_id)?;
    Ok(Json(db.list_prompts(user_id, status)?))
}

async fn answer_prompt(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<MealCookedPrompt>, ApiError> {
    Ok(Json(state.db().answer_prompt(id, req.answer)?))
}

// --- Jobs ---

/// Run one scheduler tick. Step failures are reported in the body, not as
/// an error status.
/// The tick blocks on push delivery, so it runs on the blocking pool.
async fn run_tick(
    State(state): State<AppState>,
    Query(query): Query<TickQuery>,
) -> Result<Json<TickReport>, ApiError> {
    let date = query.date.unwrap_or_else(today);
    let report = tokio::task::spawn_blocking(move || {
        let matcher = state.matcher();
        state
            .db()
            .run_tick(date, state.notifier.as_ref(), &matcher, &state.settings)
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))?;
    Ok(Json(report))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/users/{user_id}/ingredients",
            get(list_ingredients).post(create_ingredient),
        )
        .route("/api/users/{user_id}/pantry", get(list_pantry).post(add_pantry))
        .route("/api/users/{user_id}/pantry/{ingredient_id}", put(set_pantry))
        .route(
            "/api/users/{user_id}/shopping",
            get(list_shopping).post(add_shopping),
        )
        .route("/api/users/{user_id}/shopping/generate", post(generate_shopping))
        .route("/api/users/{user_id}/shopping/restock", post(restock))
        .route(
            "/api/users/{user_id}/shopping/{ingredient_id}/check",
            post(check_shopping),
        )
        .route("/api/users/{user_id}/recipes", get(list_recipes))
        .route("/api/recipes/{id}", get(get_recipe))
        .route("/api/users/{user_id}/plans", get(list_plans).post(create_plan))
        .route("/api/plans/{id}/validate", post(validate_plan))
        .route("/api/users/{user_id}/suggestions/today", get(today_suggestion))
        .route("/api/suggestions/{id}/accept", post(accept_suggestion))
        .route("/api/suggestions/{id}/dismiss", post(dismiss_suggestion))
        .route("/api/users/{user_id}/prompts", get(list_prompts))
        .route("/api/prompts/{id}/answer", post(answer_prompt))
        .route("/api/jobs/tick", post(run_tick))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

/// First and last four characters of the key, or a mask when the key is too
/// short to abbreviate.
fn key_hint(key: &str) -> String {
    let head = key.get(..4);
    let tail = key.len().checked_sub(4).and_then(|start| key.get(start..));
    match (head, tail) {
        (Some(head), Some(tail)) if key.len() > 8 => format!("{head}...{tail}"),
        _ => "****".to_string(),
    }
}

pub async fn start_server(
    db: Database,
    port: u16,
    bind: &str,
    api_key: Option<String>,
    new_api_key: bool,
    notifier: Arc<dyn PushNotifier>,
    settings: JobSettings,
) -> anyhow::Result<()> {
    let state = AppState {
        db: Arc::new(Mutex::new(db)),
        notifier,
        settings,
        api_key: api_key.clone(),
    };

    let app = build_router(state);

    if let Some(ref key) = api_key {
        if !new_api_key {
            eprintln!("API key: {} (see api_key file in data directory)", key_hint(key));
        }
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    tracing::info!(%bind, port, "server listening");
    eprintln!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
