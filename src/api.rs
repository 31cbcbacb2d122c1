use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::{
    app_state::AppState,
    auth::AuthUser,
    error::ApiError,
    models::{EthicalRoute, RouteSummary},
    validation,
};

// --- Respuestas de la API ---

#[derive(Serialize)]
pub struct CreatedResponse {
    message: &'static str,
    id: String,
}

#[derive(Serialize)]
pub struct ParticipationResponse {
    ok: bool,
    participations: u64,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/api/ethical-routes",
            get(list_routes_handler).post(create_route_handler),
        )
        .route(
            "/api/ethical-routes/:id",
            get(get_route_handler)
                .patch(update_route_handler)
                .delete(delete_route_handler),
        )
        .route(
            "/api/ethical-routes/:id/participation",
            post(participation_handler),
        )
        .fallback(fallback_handler)
        .layer(middleware::map_response(no_store))
        .with_state(app_state)
}

/// Las respuestas dependen de la identidad: nunca se cachean.
async fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, proxy-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    response
}

fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

// --- Handlers ---

#[axum::debug_handler]
async fn list_routes_handler(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<Vec<RouteSummary>>, ApiError> {
    Ok(Json(state.routes.list().await?))
}

#[axum::debug_handler]
async fn create_route_handler(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let body = json_body(body)?;
    let draft = validation::validate_route(&body).map_err(ApiError::Validation)?;
    let id = state.routes.create(draft, &user).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            message: "Ruta ética creada con éxito",
            id,
        }),
    ))
}

#[axum::debug_handler]
async fn get_route_handler(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<EthicalRoute>, ApiError> {
    Ok(Json(state.routes.get(&id).await?))
}

#[axum::debug_handler]
async fn update_route_handler(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let body = json_body(body)?;
    // Existencia y permisos antes que el contenido: 404/403 no dependen del cuerpo.
    let root = state.routes.editable(&id, &user).await?;
    let update = validation::validate_update(&body).map_err(ApiError::InvalidUpdate)?;
    state.routes.apply_update(root, update, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn delete_route_handler(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.routes.delete(&id, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn participation_handler(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ParticipationResponse>, ApiError> {
    let participations = state.routes.record_participation(&id).await?;
    info!("Participación registrada en {id} (total {participations})");
    Ok(Json(ParticipationResponse {
        ok: true,
        participations,
    }))
}

async fn fallback_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": "Recurso no encontrado" })),
    )
}
