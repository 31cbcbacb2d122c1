//! Cliente genérico de persistencia: un almacén de documentos clave-valor con
//! subcolecciones anidadas (`coleccion/doc/subcoleccion/doc/...`).
//!
//! API pública:
//!   - `DocumentStore` (get / list / set / update / delete / increment / commit)
//!   - `CollectionRef`, `DocRef`, `WriteBatch`
//!   - backends `memory::InMemoryStore` y `neo4j::Neo4jStore`.

pub mod memory;
pub mod neo4j;

use std::fmt;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use memory::InMemoryStore;
pub use neo4j::Neo4jStore;

/// Campos de un documento.
pub type Fields = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("documento no encontrado: {0}")]
    NotFound(String),
    #[error("documento corrupto en {path}: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("error del backend de almacenamiento: {0}")]
    Backend(String),
}

impl From<neo4rs::Error> for StoreError {
    fn from(err: neo4rs::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Un id es un único segmento de ruta: no vacío y sin `/` ni `.`.
pub fn is_valid_id(id: &str) -> bool {
    !id.trim().is_empty() && !id.contains(['/', '.'])
}

/// Referencia a una colección, raíz o anidada bajo un documento.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionRef {
    path: String,
}

impl CollectionRef {
    pub fn root(name: &str) -> Self {
        Self {
            path: name.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn doc(&self, id: &str) -> DocRef {
        DocRef {
            collection: self.clone(),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Referencia estable a un documento dentro de una colección.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocRef {
    collection: CollectionRef,
    id: String,
}

impl DocRef {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> &CollectionRef {
        &self.collection
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.collection.path, self.id)
    }

    /// Subcolección anidada bajo este documento.
    pub fn collection(&self, name: &str) -> CollectionRef {
        CollectionRef {
            path: format!("{}/{}", self.path(), name),
        }
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection.path, self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub reference: DocRef,
    pub data: Fields,
}

impl Document {
    pub fn id(&self) -> &str {
        self.reference.id()
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }
}

/// Operación de escritura individual.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Crea o reemplaza por completo el contenido del documento.
    Set { doc: DocRef, data: Fields },
    /// Fusiona campos en un documento existente.
    Update { doc: DocRef, fields: Fields },
    /// Borra el documento y todas sus subcolecciones.
    Delete { doc: DocRef },
}

/// Lote de escrituras que se aplica de forma atómica con `DocumentStore::commit`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, doc: DocRef, data: Fields) -> &mut Self {
        self.ops.push(WriteOp::Set { doc, data });
        self
    }

    pub fn update(&mut self, doc: DocRef, fields: Fields) -> &mut Self {
        self.ops.push(WriteOp::Update { doc, fields });
        self
    }

    pub fn delete(&mut self, doc: DocRef) -> &mut Self {
        self.ops.push(WriteOp::Delete { doc });
        self
    }

    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, doc: &DocRef) -> StoreResult<Option<Document>>;

    /// Documentos hijos directos de una colección, ordenados por id.
    async fn list(&self, collection: &CollectionRef) -> StoreResult<Vec<Document>>;

    /// Suma atómica sobre un campo numérico; un campo ausente cuenta como 0.
    /// Devuelve el valor resultante.
    async fn increment(&self, doc: &DocRef, field: &str, delta: i64) -> StoreResult<i64>;

    /// Aplica todas las operaciones del lote o ninguna.
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    async fn set(&self, doc: &DocRef, data: Fields) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.set(doc.clone(), data);
        self.commit(batch).await
    }

    async fn update(&self, doc: &DocRef, fields: Fields) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.update(doc.clone(), fields);
        self.commit(batch).await
    }

    async fn delete(&self, doc: &DocRef) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(doc.clone());
        self.commit(batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_references_build_slash_paths() {
        let route = CollectionRef::root("ethical_routes").doc("abc");
        let child = route.collection("branches").doc("si");
        assert_eq!(child.path(), "ethical_routes/abc/branches/si");
        assert_eq!(child.parent().path(), "ethical_routes/abc/branches");
        assert_eq!(child.collection("branches").path(), "ethical_routes/abc/branches/si/branches");
    }

    #[test]
    fn ids_are_single_path_segments() {
        assert!(is_valid_id("3f2a9c"));
        assert!(is_valid_id("tal_vez"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("  "));
        assert!(!is_valid_id("abc/branches/si"));
        assert!(!is_valid_id(".."));
    }

    #[test]
    fn single_writes_go_through_commit() {
        let store = InMemoryStore::new();
        let doc = CollectionRef::root("ethical_routes").doc("r1");
        let mut data = Fields::new();
        data.insert("question".into(), Value::from("¿Q?"));

        tokio_test::block_on(store.set(&doc, data)).unwrap();
        let mut extra = Fields::new();
        extra.insert("description".into(), Value::from("D"));
        tokio_test::block_on(store.update(&doc, extra)).unwrap();

        let stored = tokio_test::block_on(store.get(&doc)).unwrap().unwrap();
        assert_eq!(stored.str_field("question"), Some("¿Q?"));
        assert_eq!(stored.str_field("description"), Some("D"));

        let missing = CollectionRef::root("ethical_routes").doc("r2");
        assert!(matches!(
            tokio_test::block_on(store.update(&missing, Fields::new())),
            Err(StoreError::NotFound(_))
        ));
        tokio_test::block_on(store.delete(&doc)).unwrap();
        assert!(tokio_test::block_on(store.get(&doc)).unwrap().is_none());
    }
}
