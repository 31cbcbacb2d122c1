//! Backend en memoria. Es el almacén por defecto y el que usan los tests.
//!
//! Los lotes se validan antes de tocar nada y luego se aplican en sitio bajo
//! el cerrojo de escritura.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    CollectionRef, DocRef, Document, DocumentStore, Fields, StoreError, StoreResult, WriteBatch,
    WriteOp,
};

#[derive(Debug, Clone)]
struct StoredDoc {
    reference: DocRef,
    data: Fields,
}

type Docs = BTreeMap<String, StoredDoc>;

/// Documentos indexados por su ruta completa.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    docs: RwLock<Docs>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Número total de documentos, a cualquier nivel.
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

/// Comprueba que cada `Update` del lote encuentre su documento, teniendo en
/// cuenta los `Set` y `Delete` anteriores del mismo lote. `Set` y `Delete` no
/// fallan, así que un lote que pasa esta comprobación se aplica entero.
fn check_updates(docs: &Docs, ops: &[WriteOp]) -> StoreResult<()> {
    for (i, op) in ops.iter().enumerate() {
        let WriteOp::Update { doc, .. } = op else {
            continue;
        };
        let path = doc.path();
        let exists = ops[..i]
            .iter()
            .rev()
            .find_map(|earlier| match earlier {
                WriteOp::Set { doc, .. } if doc.path() == path => Some(true),
                WriteOp::Delete { doc } if covers(&doc.path(), &path) => Some(false),
                _ => None,
            })
            .unwrap_or_else(|| docs.contains_key(&path));
        if !exists {
            return Err(StoreError::NotFound(path));
        }
    }
    Ok(())
}

fn covers(deleted: &str, path: &str) -> bool {
    path == deleted || path.strip_prefix(deleted).is_some_and(|rest| rest.starts_with('/'))
}

fn apply(docs: &mut Docs, op: WriteOp) {
    match op {
        WriteOp::Set { doc, data } => {
            docs.insert(doc.path(), StoredDoc { reference: doc, data });
        }
        WriteOp::Update { doc, fields } => {
            if let Some(stored) = docs.get_mut(&doc.path()) {
                stored.data.extend(fields);
            }
        }
        WriteOp::Delete { doc } => {
            let path = doc.path();
            let prefix = format!("{path}/");
            let nested: Vec<String> = docs
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .map(|(key, _)| key.clone())
                .collect();
            docs.remove(&path);
            for key in nested {
                docs.remove(&key);
            }
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, doc: &DocRef) -> StoreResult<Option<Document>> {
        let docs = self.docs.read().await;
        Ok(docs.get(&doc.path()).map(|stored| Document {
            reference: stored.reference.clone(),
            data: stored.data.clone(),
        }))
    }

    async fn list(&self, collection: &CollectionRef) -> StoreResult<Vec<Document>> {
        let docs = self.docs.read().await;
        let prefix = format!("{}/", collection.path());
        Ok(docs
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(_, stored)| stored.reference.parent() == collection)
            .map(|(_, stored)| Document {
                reference: stored.reference.clone(),
                data: stored.data.clone(),
            })
            .collect())
    }

    async fn increment(&self, doc: &DocRef, field: &str, delta: i64) -> StoreResult<i64> {
        let mut docs = self.docs.write().await;
        let path = doc.path();
        let stored = docs
            .get_mut(&path)
            .ok_or_else(|| StoreError::NotFound(path.clone()))?;
        let current = match stored.data.get(field) {
            None | Some(Value::Null) => 0,
            Some(value) => value.as_i64().ok_or_else(|| StoreError::Corrupt {
                path: path.clone(),
                reason: format!("el campo '{field}' no es un entero"),
            })?,
        };
        let next = current + delta;
        stored.data.insert(field.to_string(), Value::from(next));
        Ok(next)
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut docs = self.docs.write().await;
        check_updates(&docs, batch.ops())?;
        for op in batch.into_ops() {
            apply(&mut docs, op);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn list_returns_only_direct_children() {
        let store = InMemoryStore::new();
        let route = CollectionRef::root("ethical_routes").doc("r1");
        let branches = route.collection("branches");
        store.set(&route, fields(json!({ "question": "q" }))).await.unwrap();
        store.set(&branches.doc("si"), fields(json!({ "answer": "si" }))).await.unwrap();
        store
            .set(&branches.doc("si").collection("branches").doc("x"), fields(json!({})))
            .await
            .unwrap();

        let listed = store.list(&branches).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id(), "si");
    }

    #[tokio::test]
    async fn delete_cascades_to_subcollections() {
        let store = InMemoryStore::new();
        let route = CollectionRef::root("ethical_routes").doc("r1");
        let other = CollectionRef::root("ethical_routes").doc("r10");
        let leaf = route.collection("branches").doc("si").collection("branches").doc("no");
        store.set(&route, Fields::new()).await.unwrap();
        store.set(&other, Fields::new()).await.unwrap();
        store.set(&leaf, Fields::new()).await.unwrap();

        store.delete(&route).await.unwrap();
        assert!(store.get(&leaf).await.unwrap().is_none());
        assert!(store.get(&other).await.unwrap().is_some());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn failed_batch_leaves_nothing_behind() {
        let store = InMemoryStore::new();
        let coll = CollectionRef::root("ethical_routes");
        let mut batch = WriteBatch::new();
        batch.set(coll.doc("a"), Fields::new());
        batch.update(coll.doc("missing"), fields(json!({ "x": 1 })));

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn updates_see_earlier_writes_of_the_same_batch() {
        let store = InMemoryStore::new();
        let coll = CollectionRef::root("ethical_routes");
        let route = coll.doc("r1");
        let branch = route.collection("branches").doc("si");
        store.set(&route, fields(json!({ "question": "q" }))).await.unwrap();
        store.set(&branch, fields(json!({ "answer": "si" }))).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.delete(route.clone());
        batch.update(branch.clone(), fields(json!({ "advice": "x" })));
        assert!(matches!(store.commit(batch).await, Err(StoreError::NotFound(_))));
        assert_eq!(store.len().await, 2);

        let mut batch = WriteBatch::new();
        batch.delete(route.clone());
        batch.set(coll.doc("r2"), Fields::new());
        batch.update(coll.doc("r2"), fields(json!({ "question": "nueva" })));
        store.commit(batch).await.unwrap();

        assert!(store.get(&branch).await.unwrap().is_none());
        let r2 = store.get(&coll.doc("r2")).await.unwrap().unwrap();
        assert_eq!(r2.str_field("question"), Some("nueva"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryStore::new());
        let doc = CollectionRef::root("ethical_routes").doc("r1");
        store.set(&doc, fields(json!({ "participations": 0 }))).await.unwrap();

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = Arc::clone(&store);
                let doc = doc.clone();
                tokio::spawn(async move { store.increment(&doc, "participations", 1).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stored = store.get(&doc).await.unwrap().unwrap();
        assert_eq!(stored.data["participations"], json!(50));
    }
}
