//! Cliente HTTP de la API de rutas éticas.
//!
//! Lo usan la importación de ficheros JSON y el recorrido interactivo desde
//! terminal, que avisa de cada participación completada.

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use crate::{
    auth::{USER_ID_HEADER, USER_ROLE_HEADER},
    models::{EthicalRoute, RouteDraft},
    traversal::CompletionNotifier,
    validation,
};

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base: Url,
    user_id: String,
    role: Option<String>,
}

#[derive(Deserialize)]
struct CreatedBody {
    id: String,
}

impl ApiClient {
    pub fn new(base: &str, user_id: &str, role: Option<String>) -> Result<Self> {
        Ok(Self {
            http: Client::new(),
            base: Url::parse(base).with_context(|| format!("URL de API inválida: {base}"))?,
            user_id: user_id.to_string(),
            role,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        let req = req.header(USER_ID_HEADER, &self.user_id);
        match &self.role {
            Some(role) => req.header(USER_ROLE_HEADER, role),
            None => req,
        }
    }

    pub async fn fetch_route(&self, id: &str) -> Result<EthicalRoute> {
        let url = self.url(&format!("/api/ethical-routes/{id}"))?;
        let res = self.authorized(self.http.get(url)).send().await?;
        match res.status() {
            StatusCode::OK => Ok(res.json().await?),
            StatusCode::NOT_FOUND => Err(anyhow!("La ruta {id} no existe")),
            status => Err(anyhow!("Error {status} al leer la ruta {id}: {}", error_message(res).await)),
        }
    }

    /// Sube una ruta ya validada y devuelve su id.
    pub async fn create_route(&self, draft: &RouteDraft) -> Result<String> {
        let url = self.url("/api/ethical-routes")?;
        let res = self.authorized(self.http.post(url)).json(draft).send().await?;
        if res.status() != StatusCode::CREATED {
            let status = res.status();
            return Err(anyhow!("Error al subir a API ({status}): {}", error_message(res).await));
        }
        let body: CreatedBody = res.json().await?;
        Ok(body.id)
    }

    pub async fn record_participation(&self, id: &str) -> Result<()> {
        let url = self.url(&format!("/api/ethical-routes/{id}/participation"))?;
        let res = self.authorized(self.http.post(url)).send().await?;
        if !res.status().is_success() {
            return Err(anyhow!("Falló la actualización ({})", res.status()));
        }
        Ok(())
    }
}

async fn error_message(res: reqwest::Response) -> String {
    match res.json::<Value>().await {
        Ok(body) => body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Error desconocido")
            .to_string(),
        Err(_) => "Error desconocido".to_string(),
    }
}

/// Lee y valida un fichero de ruta antes de enviarlo. Si no es válido, el
/// error contiene todos los problemas con su ruta de claves, uno por línea.
pub fn load_route_file(path: &Path) -> Result<RouteDraft> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if !is_json {
        return Err(anyhow!("Solo se permiten archivos JSON"));
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Error al procesar el archivo {}", path.display()))?;
    parse_route_document(&text)
}

pub fn parse_route_document(text: &str) -> Result<RouteDraft> {
    let json: Value =
        serde_json::from_str(text).map_err(|e| anyhow!("Error al procesar el archivo: {e}"))?;
    validation::validate_route(&json).map_err(|errors| anyhow!(errors.joined()))
}

/// Notificador que avisa a la API por HTTP sin esperar la respuesta.
pub struct HttpParticipationNotifier {
    client: ApiClient,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl HttpParticipationNotifier {
    pub fn new(client: ApiClient) -> Arc<Self> {
        Arc::new(Self {
            client,
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Espera a los avisos en vuelo (al salir del proceso).
    pub async fn wait_pending(&self) {
        let handles: Vec<_> = match self.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return,
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl CompletionNotifier for HttpParticipationNotifier {
    fn notify_completion(&self, route_id: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Sin runtime de tokio: no se notifica la participación en {route_id}");
            return;
        };
        let client = self.client.clone();
        let route_id = route_id.to_string();
        let handle = runtime.spawn(async move {
            match client.record_participation(&route_id).await {
                Ok(()) => info!("Participación registrada en {route_id}"),
                Err(err) => warn!("{err}"),
            }
        });
        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_reports_every_problem_at_once() {
        let err = parse_route_document(
            r#"{ "question": "", "description": "d", "branches": { "si": {}, "no": { "advice": "" } } }"#,
        )
        .unwrap_err()
        .to_string();

        assert!(err.starts_with("Error de validación:"));
        assert!(err.contains("Campo 'question': La pregunta es requerida"));
        assert!(err.contains("Campo 'branches.si'"));
        assert!(err.contains("Campo 'branches.no.advice'"));
    }

    #[test]
    fn import_rejects_non_json_files_and_bad_syntax() {
        let err = load_route_file(Path::new("ruta.yaml")).unwrap_err();
        assert_eq!(err.to_string(), "Solo se permiten archivos JSON");

        let err = parse_route_document("{ no es json").unwrap_err();
        assert!(err.to_string().starts_with("Error al procesar el archivo"));
    }

    #[test]
    fn valid_document_is_ready_to_upload() {
        let draft = parse_route_document(
            r#"{ "question": "¿Q?", "description": "D", "branches": { "si": { "conclusion": "C" } } }"#,
        )
        .unwrap();
        assert_eq!(draft.branches["si"].answer.as_deref(), Some("si"));
    }
}
