//! Identidad del usuario autenticado.
//!
//! La sesión la valida el proveedor de identidad que hay delante del servicio
//! y éste reenvía la identidad en cabeceras: `x-user-id` (obligatoria) y
//! `x-user-role` (`admin` concede permisos de administración).

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub is_admin: bool,
}

impl AuthUser {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let id = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())?;
        let is_admin = headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|role| role.trim().eq_ignore_ascii_case("admin"));
        Some(Self {
            id: id.to_string(),
            is_admin,
        })
    }

    /// El dueño de un recurso o un administrador pueden modificarlo.
    pub fn can_modify(&self, owner: &str) -> bool {
        self.is_admin || self.id == owner
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        AuthUser::from_headers(&parts.headers).ok_or(ApiError::Unauthorized)
    }
}
