//! Backend sobre Neo4j.
//!
//! Cada documento es un nodo `(:Document {path, collection, id, data})` donde
//! `data` es el JSON serializado de sus campos de texto y estructura. Los
//! campos enteros (contadores, posiciones) se guardan como propiedades nativas
//! del nodo, de modo que `increment` es una suma atómica en una sola sentencia.
//! Las subcolecciones no son relaciones: se resuelven por prefijo de `path`,
//! lo que hace trivial el borrado en cascada.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use neo4rs::{query, Graph, Query, Row, Txn};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use super::{
    CollectionRef, DocRef, Document, DocumentStore, Fields, StoreError, StoreResult, WriteBatch,
    WriteOp,
};
use crate::config::AppConfig;

/// Propiedades propias del nodo; el resto son campos enteros del documento.
const RESERVED: [&str; 4] = ["path", "collection", "id", "data"];

/// Devuelve `data` y los campos enteros nativos de `d`.
const RETURN_FIELDS: &str = "d.data AS data,
     [k IN keys(d) WHERE NOT k IN $reserved] AS int_names,
     [k IN keys(d) WHERE NOT k IN $reserved | d[k]] AS int_values";

pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    /// Conecta usando `NEO4J_URI` / `NEO4J_USER` / `NEO4J_PASSWORD` y asegura el esquema.
    pub async fn connect(cfg: &AppConfig) -> Result<Self> {
        let neo4j = cfg
            .neo4j
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Falta la configuración de Neo4j"))?;
        let url = Url::parse(&neo4j.uri)?;
        let host = url.host_str().unwrap_or("localhost");
        let port = url.port().unwrap_or(7687);
        let addr = format!("{host}:{port}");

        info!("Conectando a Neo4j en {addr}...");
        let graph = Graph::new(&addr, &neo4j.user, &neo4j.password).await?;
        info!("Conexión a Neo4j OK");

        let store = Self { graph };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Crea el constraint de unicidad sobre `Document.path` y el índice por colección.
    async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            "CREATE CONSTRAINT document_path IF NOT EXISTS
             FOR (d:Document)
             REQUIRE d.path IS UNIQUE",
            "CREATE INDEX document_collection IF NOT EXISTS
             FOR (d:Document)
             ON (d.collection)",
        ];

        for stmt in statements {
            self.graph.run(query(stmt)).await?;
        }

        info!("Esquema de Neo4j asegurado (documentos por ruta y colección).");
        Ok(())
    }

    /// Lee los campos de un documento dentro de una transacción, tomando antes
    /// el bloqueo de escritura del nodo para que nadie lo modifique entre la
    /// lectura y la escritura.
    async fn locked_fields(tx: &Txn, path: &str) -> StoreResult<Fields> {
        let mut rows = tx
            .execute(
                query(&format!(
                    "MATCH (d:Document {{path: $path}})
                     SET d._lock = true
                     REMOVE d._lock
                     RETURN {RETURN_FIELDS}"
                ))
                .param("path", path.to_string())
                .param("reserved", reserved()),
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        // La conexión de la transacción no admite otra consulta hasta agotar el stream.
        while rows.next().await?.is_some() {}
        fields_from_row(path, &row)
    }

    async fn write_fields(tx: &Txn, path: &str, fields: &Fields) -> StoreResult<()> {
        let (data, ints) = split_fields(fields);
        tx.run(
            query(
                "MATCH (d:Document {path: $path})
                 SET d.data = $data
                 SET d += $ints",
            )
            .param("path", path.to_string())
            .param("data", data)
            .param("ints", ints),
        )
        .await?;
        Ok(())
    }
}

fn reserved() -> Vec<String> {
    RESERVED.iter().map(|k| k.to_string()).collect()
}

/// Separa los campos enteros, que viven como propiedades nativas, del resto,
/// que se serializa como JSON en `data`.
fn split_fields(fields: &Fields) -> (String, HashMap<String, i64>) {
    let mut rest = Fields::new();
    let mut ints = HashMap::new();
    for (key, value) in fields {
        match value.as_i64() {
            Some(n) if is_property_name(key) => {
                ints.insert(key.clone(), n);
            }
            _ => {
                rest.insert(key.clone(), value.clone());
            }
        }
    }
    (Value::Object(rest).to_string(), ints)
}

/// Nombre que puede usarse tal cual como propiedad en Cypher.
fn is_property_name(name: &str) -> bool {
    !name.is_empty()
        && !RESERVED.contains(&name)
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

fn decode_fields(path: &str, raw: &str) -> StoreResult<Fields> {
    if raw.is_empty() {
        return Ok(Fields::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError::Corrupt {
            path: path.to_string(),
            reason: "`data` no es un objeto JSON".to_string(),
        }),
        Err(e) => Err(StoreError::Corrupt {
            path: path.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn merge_ints(path: &str, mut fields: Fields, names: Vec<String>, values: Vec<i64>) -> StoreResult<Fields> {
    if names.len() != values.len() {
        return Err(StoreError::Corrupt {
            path: path.to_string(),
            reason: "propiedades enteras incompletas".to_string(),
        });
    }
    for (name, value) in names.into_iter().zip(values) {
        fields.insert(name, Value::from(value));
    }
    Ok(fields)
}

fn fields_from_row(path: &str, row: &Row) -> StoreResult<Fields> {
    let raw: String = row.get("data").unwrap_or_default();
    let names: Vec<String> = row.get("int_names").unwrap_or_default();
    let values: Vec<i64> = row.get("int_values").ok_or_else(|| StoreError::Corrupt {
        path: path.to_string(),
        reason: "hay propiedades del nodo que no son enteras".to_string(),
    })?;
    merge_ints(path, decode_fields(path, &raw)?, names, values)
}

fn set_query(doc: &DocRef, data: &Fields) -> Query {
    let (json, ints) = split_fields(data);
    let mut props = HashMap::new();
    props.insert("path".to_string(), doc.path());
    props.insert("collection".to_string(), doc.parent().path().to_string());
    props.insert("id".to_string(), doc.id().to_string());
    props.insert("data".to_string(), json);
    // `SET d = ...` reemplaza todas las propiedades, incluidos los enteros previos.
    query(
        "MERGE (d:Document {path: $path})
         SET d = $props
         SET d += $ints",
    )
    .param("path", doc.path())
    .param("props", props)
    .param("ints", ints)
}

fn delete_query(doc: &DocRef) -> Query {
    let path = doc.path();
    query(
        "MATCH (d:Document)
         WHERE d.path = $path OR d.path STARTS WITH $prefix
         DETACH DELETE d",
    )
    .param("prefix", format!("{path}/"))
    .param("path", path)
}

#[async_trait]
impl DocumentStore for Neo4jStore {
    async fn get(&self, doc: &DocRef) -> StoreResult<Option<Document>> {
        let path = doc.path();
        let mut cursor = self
            .graph
            .execute(
                query(&format!("MATCH (d:Document {{path: $path}}) RETURN {RETURN_FIELDS}"))
                    .param("path", path.clone())
                    .param("reserved", reserved()),
            )
            .await?;

        let mut found: Option<Fields> = None;
        while let Some(row) = cursor.next().await? {
            if found.is_none() {
                found = Some(fields_from_row(&path, &row)?);
            }
        }

        Ok(found.map(|data| Document {
            reference: doc.clone(),
            data,
        }))
    }

    async fn list(&self, collection: &CollectionRef) -> StoreResult<Vec<Document>> {
        let mut cursor = self
            .graph
            .execute(
                query(&format!(
                    "MATCH (d:Document {{collection: $collection}})
                     RETURN d.id AS id, {RETURN_FIELDS}
                     ORDER BY id"
                ))
                .param("collection", collection.path().to_string())
                .param("reserved", reserved()),
            )
            .await?;

        let mut docs = Vec::new();
        while let Some(row) = cursor.next().await? {
            let id: String = row.get("id").ok_or_else(|| StoreError::Corrupt {
                path: collection.path().to_string(),
                reason: "falta el campo 'id' en un documento".to_string(),
            })?;
            let reference = collection.doc(&id);
            let data = fields_from_row(&reference.path(), &row)?;
            docs.push(Document { reference, data });
        }
        Ok(docs)
    }

    async fn increment(&self, doc: &DocRef, field: &str, delta: i64) -> StoreResult<i64> {
        let path = doc.path();
        if !is_property_name(field) {
            return Err(StoreError::Backend(format!(
                "'{field}' no es un nombre de contador válido"
            )));
        }

        // Suma atómica: Neo4j bloquea el nodo durante el SET.
        let mut cursor = self
            .graph
            .execute(
                query(&format!(
                    "MATCH (d:Document {{path: $path}})
                     SET d.`{field}` = coalesce(d.`{field}`, 0) + $delta
                     RETURN d.`{field}` AS value"
                ))
                .param("path", path.clone())
                .param("delta", delta),
            )
            .await?;

        let mut next: Option<i64> = None;
        while let Some(row) = cursor.next().await? {
            next = next.or(row.get("value"));
        }
        let next = next.ok_or_else(|| StoreError::NotFound(path.clone()))?;

        debug!("{path}.{field} -> {next}");
        Ok(next)
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let ops = batch.len();
        let tx = self.graph.start_txn().await?;

        for op in batch.into_ops() {
            let result: StoreResult<()> = match op {
                WriteOp::Set { doc, data } => tx.run(set_query(&doc, &data)).await.map_err(Into::into),
                WriteOp::Delete { doc } => tx.run(delete_query(&doc)).await.map_err(Into::into),
                WriteOp::Update { doc, fields } => {
                    let path = doc.path();
                    match Self::locked_fields(&tx, &path).await {
                        Ok(mut current) => {
                            current.extend(fields);
                            Self::write_fields(&tx, &path, &current).await
                        }
                        Err(e) => Err(e),
                    }
                }
            };
            if let Err(e) = result {
                // Sin commit no queda nada escrito del lote.
                tx.rollback().await?;
                return Err(e);
            }
        }

        tx.commit().await?;
        debug!("Lote de {ops} escrituras confirmado en Neo4j");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_fields_become_native_properties() {
        let mut fields = Fields::new();
        fields.insert("question".into(), Value::from("¿Seguro?"));
        fields.insert("participations".into(), Value::from(3));
        fields.insert("position".into(), Value::from(1));
        let (data, ints) = split_fields(&fields);

        assert_eq!(ints.get("participations"), Some(&3));
        assert_eq!(ints.get("position"), Some(&1));
        let decoded = decode_fields("x", &data).unwrap();
        assert_eq!(decoded.len(), 1);

        let mut names: Vec<String> = ints.keys().cloned().collect();
        names.sort();
        let values = names.iter().map(|n| ints[n]).collect();
        assert_eq!(merge_ints("x", decoded, names, values).unwrap(), fields);
    }

    #[test]
    fn counter_names_must_be_plain_identifiers() {
        assert!(is_property_name("participations"));
        assert!(!is_property_name("data"));
        assert!(!is_property_name("a`} DETACH DELETE d //"));
        assert!(!is_property_name("1st"));
    }

    #[test]
    fn non_object_data_is_reported_as_corrupt() {
        assert!(decode_fields("x", "").unwrap().is_empty());
        assert!(matches!(
            decode_fields("ethical_routes/a", "[1,2]"),
            Err(StoreError::Corrupt { .. })
        ));
        assert!(matches!(
            merge_ints("x", Fields::new(), vec!["a".into()], vec![]),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
