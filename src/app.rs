use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::cache::CachedStore;
use crate::config::Config;
use crate::downloader;
use crate::graph::{self, ChartError, ChartOptions};
use crate::model::{FieldError, GoalId, NewEvaluation, NewGoal, NewUtilisation, ValidationError};
use crate::reconcile::{HistoryFilter, ViewFilter};
use crate::store::{StoreError, Table, TableStore, WorkbookStore};
use crate::tracker::{Tracker, TrackerError};

/// Message attached to list responses that have no items
pub const EMPTY_MESSAGE: &str = "Nothing to show yet";

pub struct AppState {
    pub tracker: Tracker<Box<dyn TableStore>>,
    pub charts: ChartOptions,
    pub leaderboard_size: usize,
}

impl AppState {
    pub fn new(store: Box<dyn TableStore>, config: &Config) -> Self {
        AppState {
            tracker: Tracker::new(store, config.store.append_retries),
            charts: ChartOptions {
                width: config.charts.width,
                height: config.charts.height,
                ..ChartOptions::default()
            },
            leaderboard_size: config.reports.leaderboard_size,
        }
    }
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

impl<T> ListResponse<T> {
    fn new(items: Vec<T>) -> Self {
        let message = items.is_empty().then_some(EMPTY_MESSAGE);
        ListResponse { items, message }
    }
}

fn list<T>(items: Vec<T>) -> Json<ListResponse<T>> {
    Json(ListResponse::new(items))
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<FieldError>,
}

/// Failures of a request, mapped onto HTTP status codes
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Chart(#[from] ChartError),

    #[error("export failed: {0}")]
    Export(#[from] rust_xlsxwriter::XlsxError),

    #[error("request task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Tracker(err.into())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Tracker(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, fields) = match self {
            AppError::Tracker(TrackerError::Validation(err)) => {
                (StatusCode::BAD_REQUEST, err.to_string(), err.fields)
            }
            AppError::Tracker(err @ TrackerError::GoalNotFound(_)) => {
                (StatusCode::NOT_FOUND, err.to_string(), Vec::new())
            }
            AppError::Tracker(TrackerError::Store(err)) => match err {
                StoreError::Conflict { .. } => {
                    warn!("{}", err);
                    (
                        StatusCode::CONFLICT,
                        format!("{}; reload and retry", err),
                        Vec::new(),
                    )
                }
                StoreError::Unavailable(_) => {
                    error!("{}", err);
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "store unavailable, retry shortly".to_string(),
                        Vec::new(),
                    )
                }
                StoreError::SchemaMismatch { .. } | StoreError::MalformedRow { .. } => {
                    error!("{}", err);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("{}; contact an administrator", err),
                        Vec::new(),
                    )
                }
            },
            other => {
                error!("{}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, other.to_string(), Vec::new())
            }
        };
        (status, Json(ErrorBody { error, fields })).into_response()
    }
}

type AppResult<T> = Result<T, AppError>;

// Store reads and writes touch the disk, so they run on the blocking pool.
async fn blocking<T, F>(state: &Arc<AppState>, work: F) -> AppResult<T>
where
    F: FnOnce(&AppState) -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || work(state.as_ref())).await?
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/health", get(health))
        .route("/api/goals", get(list_goals).post(create_goal))
        .route("/api/goals/import", post(import_goals))
        .route("/api/goals/:id", put(update_goal).delete(delete_goal))
        .route("/api/projects", get(list_projects))
        .route("/api/resources", get(list_resources))
        .route("/api/evaluations", get(list_evaluations).post(create_evaluation))
        .route("/api/history", get(history))
        .route("/api/view", get(view))
        .route("/api/analytics/summary", get(summary))
        .route("/api/analytics/leaderboard", get(leaderboard))
        .route("/api/analytics/distribution", get(distribution))
        .route("/api/analytics/trend", get(trend))
        .route("/api/utilisation", get(list_utilisation).post(create_utilisation))
        .route("/api/utilisation/summary", get(utilisation_summary))
        .route("/api/charts/status.png", get(status_chart))
        .route("/api/charts/leaderboard.png", get(leaderboard_chart))
        .route("/api/charts/trend.png", get(trend_chart))
        .route("/api/export/view.csv", get(export_view_csv))
        .route("/api/export/view.xlsx", get(export_view_xlsx))
        .route("/api/export/evaluations.csv", get(export_evaluations_csv))
        .route("/api/export/evaluations.xlsx", get(export_evaluations_xlsx))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(log_requests))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = CachedStore::new(WorkbookStore::open(&config.store.data_dir)?);
    let state = Arc::new(AppState::new(Box::new(store), &config));
    let app = router(state);

    let listener = TcpListener::bind(&config.server.bind).await?;
    info!("Listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;
    info!(
        "{} {} -> {} ({} ms)",
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}

async fn serve_index() -> Html<&'static str> {
    Html(include_str!("./static/index.html"))
}

async fn health(State(state): State<Arc<AppState>>) -> AppResult<Json<serde_json::Value>> {
    blocking(&state, |s| Ok(s.tracker.store().read_fresh(Table::MasterList)?)).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

async fn list_goals(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    Ok(list(blocking(&state, |s| Ok(s.tracker.goals()?)).await?))
}

async fn create_goal(
    State(state): State<Arc<AppState>>,
    Json(form): Json<NewGoal>,
) -> AppResult<impl IntoResponse> {
    let goal = blocking(&state, move |s| Ok(s.tracker.register_goal(form)?)).await?;
    Ok((StatusCode::CREATED, Json(goal)))
}

async fn update_goal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<GoalId>,
    Json(form): Json<NewGoal>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(blocking(&state, move |s| Ok(s.tracker.update_goal(id, form)?)).await?))
}

async fn delete_goal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<GoalId>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(blocking(&state, move |s| Ok(s.tracker.delete_goal(id)?)).await?))
}

async fn import_goals(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut text = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                warn!("Rejected goal upload: {}", err);
                return Err(ValidationError::single("upload", "could not be read").into());
            }
        };
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|_| ValidationError::single("file", "could not be read"))?;
            let content = String::from_utf8(bytes.to_vec())
                .map_err(|_| ValidationError::single("file", "is not UTF-8 text"))?;
            text = Some(content);
        }
    }

    let text = text.ok_or_else(|| ValidationError::single("file", "was not uploaded"))?;
    let goals = blocking(&state, move |s| Ok(s.tracker.import_goals_csv(&text)?)).await?;
    Ok((StatusCode::CREATED, list(goals)))
}

async fn list_projects(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    Ok(list(blocking(&state, |s| Ok(s.tracker.projects()?)).await?))
}

#[derive(Deserialize)]
struct ProjectQuery {
    project: Option<String>,
}

async fn list_resources(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProjectQuery>,
) -> AppResult<impl IntoResponse> {
    let resources = blocking(&state, move |s| Ok(s.tracker.resources(query.project.as_deref())?)).await?;
    Ok(list(resources))
}

async fn list_evaluations(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    Ok(list(blocking(&state, |s| Ok(s.tracker.evaluations()?)).await?))
}

async fn create_evaluation(
    State(state): State<Arc<AppState>>,
    Json(form): Json<NewEvaluation>,
) -> AppResult<impl IntoResponse> {
    let outcome = blocking(&state, move |s| Ok(s.tracker.record_evaluation(form)?)).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn history(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<HistoryFilter>,
) -> AppResult<impl IntoResponse> {
    Ok(list(blocking(&state, move |s| Ok(s.tracker.history(&filter)?)).await?))
}

async fn view(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ViewFilter>,
) -> AppResult<impl IntoResponse> {
    Ok(list(blocking(&state, move |s| Ok(s.tracker.reconciled(&filter)?)).await?))
}

async fn summary(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ViewFilter>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(blocking(&state, move |s| Ok(s.tracker.summary(&filter)?)).await?))
}

#[derive(Deserialize)]
struct TopQuery {
    top: Option<usize>,
}

async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ViewFilter>,
    Query(top): Query<TopQuery>,
) -> AppResult<impl IntoResponse> {
    let top_n = top.top.unwrap_or(state.leaderboard_size);
    Ok(list(blocking(&state, move |s| Ok(s.tracker.leaderboard(&filter, top_n)?)).await?))
}

async fn distribution(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ViewFilter>,
) -> AppResult<impl IntoResponse> {
    Ok(list(blocking(&state, move |s| Ok(s.tracker.status_distribution(&filter)?)).await?))
}

async fn trend(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ViewFilter>,
) -> AppResult<impl IntoResponse> {
    Ok(list(blocking(&state, move |s| Ok(s.tracker.monthly_trend(&filter)?)).await?))
}

async fn list_utilisation(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    Ok(list(blocking(&state, |s| Ok(s.tracker.utilisation()?)).await?))
}

async fn create_utilisation(
    State(state): State<Arc<AppState>>,
    Json(form): Json<NewUtilisation>,
) -> AppResult<impl IntoResponse> {
    let entry = blocking(&state, move |s| Ok(s.tracker.record_utilisation(form)?)).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn utilisation_summary(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    Ok(Json(blocking(&state, |s| Ok(s.tracker.utilisation_summary()?)).await?))
}

fn png(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "image/png")], bytes).into_response()
}

async fn status_chart(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ViewFilter>,
) -> AppResult<Response> {
    let bytes = blocking(&state, move |s| {
        let distribution = s.tracker.status_distribution(&filter)?;
        Ok(graph::status_pie(&distribution, &s.charts.titled("Goal status"))?)
    })
    .await?;
    Ok(png(bytes))
}

async fn leaderboard_chart(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ViewFilter>,
    Query(top): Query<TopQuery>,
) -> AppResult<Response> {
    let top_n = top.top.unwrap_or(state.leaderboard_size);
    let bytes = blocking(&state, move |s| {
        let entries = s.tracker.leaderboard(&filter, top_n)?;
        Ok(graph::leaderboard_bars(&entries, &s.charts.titled("Mean rating"))?)
    })
    .await?;
    Ok(png(bytes))
}

async fn trend_chart(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ViewFilter>,
) -> AppResult<Response> {
    let bytes = blocking(&state, move |s| {
        let points = s.tracker.monthly_trend(&filter)?;
        Ok(graph::trend_line(&points, &s.charts.titled("Achievement by month"))?)
    })
    .await?;
    Ok(png(bytes))
}

pub const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

fn attachment(content_type: &'static str, filename: &str, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}

async fn export_view_csv(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ViewFilter>,
) -> AppResult<Response> {
    let csv = blocking(&state, move |s| Ok(downloader::view_to_csv(&s.tracker.reconciled(&filter)?))).await?;
    Ok(attachment("text/csv", "goals.csv", csv.into_bytes()))
}

async fn export_view_xlsx(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ViewFilter>,
) -> AppResult<Response> {
    let bytes = blocking(&state, move |s| {
        Ok(downloader::view_to_xlsx(&s.tracker.reconciled(&filter)?)?)
    })
    .await?;
    Ok(attachment(XLSX_CONTENT_TYPE, "goals.xlsx", bytes))
}

async fn export_evaluations_csv(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    let csv = blocking(&state, |s| Ok(downloader::evaluations_to_csv(&s.tracker.evaluations()?))).await?;
    Ok(attachment("text/csv", "evaluations.csv", csv.into_bytes()))
}

async fn export_evaluations_xlsx(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    let bytes = blocking(&state, |s| {
        Ok(downloader::evaluations_to_xlsx(&s.tracker.evaluations()?)?)
    })
    .await?;
    Ok(attachment(XLSX_CONTENT_TYPE, "evaluations.xlsx", bytes))
}
