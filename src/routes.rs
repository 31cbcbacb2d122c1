//! Repositorio de rutas éticas sobre el almacén de documentos.
//!
//! Documento raíz en `ethical_routes/{id}` con `question`, `description`,
//! `participations`, `created_at`, `updated_at` y `created_by`; el árbol vive
//! normalizado en `ethical_routes/{id}/branches/...`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    assemble,
    auth::AuthUser,
    error::ApiError,
    models::{Branches, EthicalRoute, RouteDraft, RouteSummary, RouteUpdate},
    reconcile::{self, ReconcileSummary},
    store::{
        is_valid_id, CollectionRef, DocRef, Document, DocumentStore, Fields, StoreError, WriteBatch,
    },
};

pub const ROUTES_COLLECTION: &str = "ethical_routes";
pub const PARTICIPATIONS: &str = "participations";

#[derive(Clone)]
pub struct RouteRepository {
    store: Arc<dyn DocumentStore>,
}

impl RouteRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Un id que no es un único segmento no puede nombrar una ruta: se trata
    /// como inexistente en vez de resolverlo a un documento anidado.
    fn doc(id: &str) -> Result<DocRef, ApiError> {
        if !is_valid_id(id) {
            return Err(ApiError::NotFound(id.to_string()));
        }
        Ok(CollectionRef::root(ROUTES_COLLECTION).doc(id))
    }

    /// Crea la ruta con `participations = 0` y todo su árbol en un único lote.
    pub async fn create(&self, draft: RouteDraft, owner: &AuthUser) -> Result<String, ApiError> {
        let id = Uuid::new_v4().simple().to_string();
        let root = Self::doc(&id)?;
        let now = Utc::now();

        let mut data = Fields::new();
        data.insert("question".into(), Value::from(draft.question));
        data.insert("description".into(), Value::from(draft.description));
        data.insert(PARTICIPATIONS.into(), Value::from(0u64));
        data.insert("created_at".into(), Value::from(now.to_rfc3339()));
        data.insert("updated_at".into(), Value::from(now.to_rfc3339()));
        data.insert("created_by".into(), Value::from(owner.id.as_str()));

        let plan = reconcile::plan_new(&root, &draft.branches, now)?;
        let mut batch = WriteBatch::new();
        batch.set(root, data);
        batch.extend(plan.batch);
        self.store.commit(batch).await?;

        info!("Ruta ética {id} creada por {} ({} ramas)", owner.id, plan.summary.created);
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<EthicalRoute, ApiError> {
        let root = self.load(id).await?;
        let branches = assemble::assemble(self.store.as_ref(), &root.reference).await?;
        Ok(route_from_doc(&root, branches)?)
    }

    /// Resumen de todas las rutas, las más recientes primero.
    pub async fn list(&self) -> Result<Vec<RouteSummary>, ApiError> {
        let docs = self.store.list(&CollectionRef::root(ROUTES_COLLECTION)).await?;
        let mut summaries = docs
            .iter()
            .map(|doc| {
                route_from_doc(doc, Branches::new()).map(|route| RouteSummary {
                    document_id: route.document_id,
                    question: route.question,
                    description: route.description,
                    participations: route.participations,
                    created_at: route.created_at,
                    created_by: route.created_by,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    /// Documento raíz de una ruta que `user` puede modificar.
    pub async fn editable(&self, id: &str, user: &AuthUser) -> Result<Document, ApiError> {
        let root = self.load(id).await?;
        authorize(&root, user)?;
        Ok(root)
    }

    pub async fn update(
        &self,
        id: &str,
        update: RouteUpdate,
        user: &AuthUser,
    ) -> Result<ReconcileSummary, ApiError> {
        let root = self.editable(id, user).await?;
        self.apply_update(root, update, user).await
    }

    /// Aplica una actualización parcial sobre una raíz ya autorizada. Si trae
    /// ramas, el árbol se reconcilia y se confirma junto con los campos de la
    /// raíz en el mismo lote.
    pub async fn apply_update(
        &self,
        root: Document,
        update: RouteUpdate,
        user: &AuthUser,
    ) -> Result<ReconcileSummary, ApiError> {
        if update.is_empty() {
            return Err(ApiError::EmptyUpdate);
        }
        let id = root.id().to_string();
        let now = Utc::now();

        let mut fields = Fields::new();
        if let Some(question) = update.question {
            fields.insert("question".into(), Value::from(question));
        }
        if let Some(description) = update.description {
            fields.insert("description".into(), Value::from(description));
        }
        fields.insert("updated_at".into(), Value::from(now.to_rfc3339()));

        let mut batch = WriteBatch::new();
        batch.update(root.reference.clone(), fields);
        let mut summary = ReconcileSummary::default();
        if let Some(branches) = &update.branches {
            let plan = reconcile::plan(self.store.as_ref(), &root.reference, branches, now).await?;
            summary = plan.summary;
            batch.extend(plan.batch);
        }
        self.store.commit(batch).await?;

        info!("Ruta ética {id} actualizada por {}: {summary}", user.id);
        Ok(summary)
    }

    /// Borra la ruta y, en cascada, todas sus ramas.
    pub async fn delete(&self, id: &str, user: &AuthUser) -> Result<(), ApiError> {
        let root = self.editable(id, user).await?;
        self.store.delete(&root.reference).await?;
        info!("Ruta ética {id} eliminada por {}", user.id);
        Ok(())
    }

    /// Suma una participación de forma atómica y devuelve el nuevo total.
    pub async fn record_participation(&self, id: &str) -> Result<u64, ApiError> {
        match self.store.increment(&Self::doc(id)?, PARTICIPATIONS, 1).await {
            Ok(total) => Ok(total.max(0) as u64),
            Err(StoreError::NotFound(_)) => Err(ApiError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, id: &str) -> Result<Document, ApiError> {
        self.store
            .get(&Self::doc(id)?)
            .await?
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }
}

fn authorize(root: &Document, user: &AuthUser) -> Result<(), ApiError> {
    let owner = root.str_field("created_by").unwrap_or_default();
    if user.can_modify(owner) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

fn route_from_doc(doc: &Document, branches: Branches) -> Result<EthicalRoute, StoreError> {
    let path = doc.reference.path();
    let text = |field: &str| doc.str_field(field).unwrap_or_default().to_string();
    let timestamp = |field: &str| -> Result<DateTime<Utc>, StoreError> {
        let raw = doc.str_field(field).ok_or_else(|| StoreError::Corrupt {
            path: path.clone(),
            reason: format!("falta '{field}'"),
        })?;
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt {
                path: path.clone(),
                reason: format!("'{field}' no es una fecha válida: {e}"),
            })
    };

    Ok(EthicalRoute {
        document_id: doc.id().to_string(),
        question: text("question"),
        description: text("description"),
        participations: doc
            .data
            .get(PARTICIPATIONS)
            .and_then(Value::as_u64)
            .unwrap_or(0),
        created_at: timestamp("created_at")?,
        updated_at: timestamp("updated_at")?,
        created_by: text("created_by"),
        branches,
    })
}
