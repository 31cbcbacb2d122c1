//! Carga y gestión de configuración de la aplicación (servidor + almacenamiento).

use std::env;
use anyhow::{anyhow, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Neo4j,
}

impl StoreBackend {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "neo4j" => Ok(Self::Neo4j),
            other => Err(anyhow!("Backend de almacenamiento no soportado: {other}")),
        }
    }
}

/// Credenciales de Neo4j, sólo necesarias con `STORE_BACKEND=neo4j`.
#[derive(Clone, Debug)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub store_backend: StoreBackend,
    pub neo4j: Option<Neo4jConfig>,
    pub cors_allow_any: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:3322".to_string(),
            store_backend: StoreBackend::Memory,
            neo4j: None,
            cors_allow_any: true,
        }
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let backend_str = env::var("STORE_BACKEND").unwrap_or_else(|_| "memory".to_string());
        let store_backend = StoreBackend::from_str(&backend_str)?;

        let neo4j = match store_backend {
            StoreBackend::Neo4j => Some(Neo4jConfig {
                uri: env::var("NEO4J_URI")
                    .map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?,
                user: env::var("NEO4J_USER")
                    .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?,
                password: env::var("NEO4J_PASSWORD")
                    .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?,
            }),
            StoreBackend::Memory => None,
        };

        let cors_allow_any = env::var("CORS_ALLOW_ANY")
            .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        Ok(Self {
            server_addr,
            store_backend,
            neo4j,
            cors_allow_any,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_are_case_insensitive() {
        assert_eq!(StoreBackend::from_str("Neo4j").unwrap(), StoreBackend::Neo4j);
        assert_eq!(StoreBackend::from_str("MEMORY").unwrap(), StoreBackend::Memory);
        assert!(StoreBackend::from_str("firestore").is_err());
    }
}
