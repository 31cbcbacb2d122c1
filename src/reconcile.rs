//! Sincronización de un árbol de ramas enviado por el cliente con su forma
//! normalizada en el almacén (un documento por rama, con sus hijos en la
//! subcolección `branches`).
//!
//! Flujo:
//!   1. Fase de planificación (sólo lecturas): por cada nivel se listan los
//!      hijos existentes y se decide crear, actualizar o borrar cada clave.
//!   2. Fase de escritura: todo el plan se confirma con un único
//!      `DocumentStore::commit`, así que un fallo (incluida la profundidad
//!      excedida) no deja el árbol a medias.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::{
    models::{BranchNode, Branches, MAX_BRANCH_DEPTH},
    store::{CollectionRef, DocRef, Document, DocumentStore, Fields, StoreError, WriteBatch},
};

/// Nombre de la subcolección que guarda los hijos de un documento.
pub const BRANCHES: &str = "branches";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("el árbol supera la profundidad máxima de {max} niveles en '{path}'")]
    DepthExceeded { path: String, max: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Recuento de nodos afectados. `deleted` cuenta raíces de subárboles borrados.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl std::fmt::Display for ReconcileSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ramas creadas, {} actualizadas, {} eliminadas",
            self.created, self.updated, self.deleted
        )
    }
}

/// Escrituras pendientes de confirmar.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    pub batch: WriteBatch,
    pub summary: ReconcileSummary,
}

/// Planifica la sincronización de `branches` bajo el documento `parent`.
pub async fn plan(
    store: &dyn DocumentStore,
    parent: &DocRef,
    branches: &Branches,
    now: DateTime<Utc>,
) -> Result<ReconcilePlan, ReconcileError> {
    let mut plan = ReconcilePlan::default();
    plan_level(store, parent.collection(BRANCHES), branches, 1, now, &mut plan).await?;
    Ok(plan)
}

/// Planifica la escritura de un árbol bajo un documento recién creado, que
/// por definición no tiene hijos previos. No hace lecturas.
pub fn plan_new(
    parent: &DocRef,
    branches: &Branches,
    now: DateTime<Utc>,
) -> Result<ReconcilePlan, ReconcileError> {
    let mut plan = ReconcilePlan::default();
    plan_new_level(&parent.collection(BRANCHES), branches, 1, now, &mut plan)?;
    Ok(plan)
}

/// Planifica y confirma en un solo paso.
pub async fn reconcile(
    store: &dyn DocumentStore,
    parent: &DocRef,
    branches: &Branches,
    now: DateTime<Utc>,
) -> Result<ReconcileSummary, ReconcileError> {
    let plan = plan(store, parent, branches, now).await?;
    debug!("Reconciliando {parent}: {}", plan.summary);
    store.commit(plan.batch).await?;
    Ok(plan.summary)
}

fn plan_level<'a>(
    store: &'a dyn DocumentStore,
    collection: CollectionRef,
    branches: &'a Branches,
    depth: usize,
    now: DateTime<Utc>,
    plan: &'a mut ReconcilePlan,
) -> BoxFuture<'a, Result<(), ReconcileError>> {
    async move {
        check_depth(&collection, branches, depth)?;

        let mut existing: HashMap<String, Document> = store
            .list(&collection)
            .await?
            .into_iter()
            .map(|doc| (doc.id().to_string(), doc))
            .collect();

        for (position, (key, node)) in branches.iter().enumerate() {
            let doc = collection.doc(key);
            let empty = Branches::new();
            let children = node.branches.as_ref().unwrap_or(&empty);

            match existing.remove(key) {
                Some(current) => {
                    // Misma referencia: se reemplaza el contenido y se conserva la fecha de alta.
                    let created_at = current
                        .data
                        .get("created_at")
                        .cloned()
                        .unwrap_or_else(|| Value::from(now.to_rfc3339()));
                    let mut data = node_fields(key, node, position);
                    data.insert("created_at".into(), created_at);
                    data.insert("updated_at".into(), Value::from(now.to_rfc3339()));
                    plan.batch.set(doc.clone(), data);
                    plan.summary.updated += 1;

                    plan_level(store, doc.collection(BRANCHES), children, depth + 1, now, plan)
                        .await?;
                }
                None => {
                    plan.batch.set(doc.clone(), new_node_fields(key, node, position, now));
                    plan.summary.created += 1;
                    plan_new_level(&doc.collection(BRANCHES), children, depth + 1, now, plan)?;
                }
            }
        }

        // Lo que queda no aparece en el árbol enviado: se borra con todos sus descendientes.
        let mut stale: Vec<Document> = existing.into_values().collect();
        stale.sort_by(|a, b| a.id().cmp(b.id()));
        for doc in stale {
            plan.batch.delete(doc.reference);
            plan.summary.deleted += 1;
        }
        Ok(())
    }
    .boxed()
}

fn plan_new_level(
    collection: &CollectionRef,
    branches: &Branches,
    depth: usize,
    now: DateTime<Utc>,
    plan: &mut ReconcilePlan,
) -> Result<(), ReconcileError> {
    check_depth(collection, branches, depth)?;
    for (position, (key, node)) in branches.iter().enumerate() {
        let doc = collection.doc(key);
        plan.batch.set(doc.clone(), new_node_fields(key, node, position, now));
        plan.summary.created += 1;
        if let Some(children) = &node.branches {
            plan_new_level(&doc.collection(BRANCHES), children, depth + 1, now, plan)?;
        }
    }
    Ok(())
}

fn check_depth(
    collection: &CollectionRef,
    branches: &Branches,
    depth: usize,
) -> Result<(), ReconcileError> {
    if depth > MAX_BRANCH_DEPTH && !branches.is_empty() {
        return Err(ReconcileError::DepthExceeded {
            path: collection.path().to_string(),
            max: MAX_BRANCH_DEPTH,
        });
    }
    Ok(())
}

fn new_node_fields(key: &str, node: &BranchNode, position: usize, now: DateTime<Utc>) -> Fields {
    let mut data = node_fields(key, node, position);
    let stamp = Value::from(now.to_rfc3339());
    data.insert("created_at".into(), stamp.clone());
    data.insert("updated_at".into(), stamp);
    data
}

/// Campos de contenido de un nodo tal y como se guardan. `answer` toma la
/// clave cuando no viene informado; `position` conserva el orden entre hermanos.
pub fn node_fields(key: &str, node: &BranchNode, position: usize) -> Fields {
    let mut data = Fields::new();
    for (field, value) in node.content() {
        if let Some(v) = value {
            data.insert(field.to_string(), Value::from(v));
        }
    }
    let answer = node.answer.clone().unwrap_or_else(|| key.to_string());
    data.insert("answer".into(), Value::from(answer));
    data.insert("position".into(), Value::from(position as u64));
    data
}
