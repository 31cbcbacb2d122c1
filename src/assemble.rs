//! Reconstrucción del árbol anidado a partir de su forma normalizada.
//!
//! Los hermanos se leen en paralelo; cada rama espera sólo a su propia
//! subcolección. Un nodo sin descendientes se devuelve sin campo `branches`.

use futures::future::{try_join_all, BoxFuture, FutureExt};
use serde_json::Value;

use crate::{
    models::{BranchNode, Branches, MAX_BRANCH_DEPTH},
    reconcile::BRANCHES,
    store::{CollectionRef, DocRef, Document, DocumentStore, Fields, StoreError, StoreResult},
};

/// Árbol completo de ramas colgado de `parent`.
pub async fn assemble(store: &dyn DocumentStore, parent: &DocRef) -> StoreResult<Branches> {
    assemble_level(store, parent.collection(BRANCHES), 1).await
}

fn assemble_level(
    store: &dyn DocumentStore,
    collection: CollectionRef,
    depth: usize,
) -> BoxFuture<'_, StoreResult<Branches>> {
    async move {
        let mut docs = store.list(&collection).await?;
        if docs.is_empty() {
            return Ok(Branches::new());
        }
        if depth > MAX_BRANCH_DEPTH {
            return Err(StoreError::Corrupt {
                path: collection.path().to_string(),
                reason: format!("más de {MAX_BRANCH_DEPTH} niveles de ramas"),
            });
        }
        docs.sort_by_key(position);

        let children = try_join_all(
            docs.iter()
                .map(|doc| assemble_level(store, doc.reference.collection(BRANCHES), depth + 1)),
        )
        .await?;

        let mut branches = Branches::new();
        for (doc, children) in docs.into_iter().zip(children) {
            let mut node = node_from_fields(&doc.data);
            if !children.is_empty() {
                node.branches = Some(children);
            }
            if node.answer.is_none() {
                node.answer = Some(doc.id().to_string());
            }
            branches.insert(doc.id().to_string(), node);
        }
        Ok(branches)
    }
    .boxed()
}

/// Orden entre hermanos: `position` guardado y, a igualdad, el id.
fn position(doc: &Document) -> (u64, String) {
    let pos = doc
        .data
        .get("position")
        .and_then(Value::as_u64)
        .unwrap_or(u64::MAX);
    (pos, doc.id().to_string())
}

/// Campos de contenido de un documento de rama (sin hijos).
pub fn node_from_fields(data: &Fields) -> BranchNode {
    let text = |field: &str| data.get(field).and_then(Value::as_str).map(str::to_string);
    BranchNode {
        question: text("question"),
        answer: text("answer"),
        conclusion: text("conclusion"),
        advice: text("advice"),
        comentario_final: text("comentario_final"),
        branches: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn documents_written_by_hand_assemble_with_defaults() {
        let store = InMemoryStore::new();
        let route = CollectionRef::root("ethical_routes").doc("r1");
        let branches = route.collection(BRANCHES);
        store
            .set(&branches.doc("si"), fields(json!({ "question": "¿Y ahora?" })))
            .await
            .unwrap();
        store
            .set(
                &branches.doc("si").collection(BRANCHES).doc("vale"),
                fields(json!({ "conclusion": "Fin", "created_at": "2024-01-01T00:00:00Z" })),
            )
            .await
            .unwrap();

        let tree = assemble(&store, &route).await.unwrap();
        let si = &tree["si"];
        assert_eq!(si.answer.as_deref(), Some("si"));
        let leaf = &si.branches.as_ref().unwrap()["vale"];
        assert_eq!(leaf.conclusion.as_deref(), Some("Fin"));
        assert!(leaf.branches.is_none());

        let json = serde_json::to_value(&tree).unwrap();
        assert!(json["si"]["branches"]["vale"].get("branches").is_none());
        assert!(json["si"]["branches"]["vale"].get("created_at").is_none());
    }

    #[tokio::test]
    async fn missing_route_assembles_to_empty_tree() {
        let store = InMemoryStore::new();
        let route = CollectionRef::root("ethical_routes").doc("nope");
        assert!(assemble(&store, &route).await.unwrap().is_empty());
    }
}
