//! Errores de la API y su traducción a respuestas HTTP.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::{reconcile::ReconcileError, store::StoreError, validation::ValidationErrors};

#[derive(Debug, Error)]
pub enum ApiError {
    /// Cuerpo de creación inválido (400).
    #[error("Error de validación")]
    Validation(ValidationErrors),
    /// Cuerpo de actualización inválido (422).
    #[error("Error de validación")]
    InvalidUpdate(ValidationErrors),
    #[error("La actualización no puede estar vacía")]
    EmptyUpdate,
    #[error("El árbol supera la profundidad máxima de {max} niveles ({path})")]
    DepthExceeded { path: String, max: usize },
    #[error("Petición inválida: {0}")]
    BadRequest(String),
    #[error("No autenticado")]
    Unauthorized,
    #[error("No tienes permiso para modificar esta ruta")]
    Forbidden,
    #[error("Ruta ética no encontrada: {0}")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::DepthExceeded { path, max } => ApiError::DepthExceeded { path, max },
            ReconcileError::Store(e) => ApiError::Storage(e),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidUpdate(_) | ApiError::EmptyUpdate | ApiError::DepthExceeded { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Validation(errors) | ApiError::InvalidUpdate(errors) => {
                json!({ "message": self.to_string(), "errors": errors })
            }
            ApiError::Storage(e) => {
                error!("Error de almacenamiento: {e}");
                json!({ "message": "Error interno del servidor" })
            }
            other => json!({ "message": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
