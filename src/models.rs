//! Modelos de dominio: nodos de rama (recursivos) y rutas éticas.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Profundidad máxima de un árbol de ramas (número de niveles anidados).
pub const MAX_BRANCH_DEPTH: usize = 20;

/// Hijos de un nodo, indexados por la clave de respuesta que lleva a ellos.
/// Se conserva el orden de inserción para presentar las opciones tal cual se escribieron.
pub type Branches = IndexMap<String, BranchNode>;

/// Un nodo del árbol de decisión.
///
/// Un nodo con `conclusion` es terminal para el recorrido aunque tenga hijos.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Etiqueta visible de la respuesta. Por defecto es la clave del nodo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comentario_final: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branches: Option<Branches>,
}

impl BranchNode {
    /// La presencia de `conclusion` marca el final de un recorrido.
    pub fn is_conclusion(&self) -> bool {
        self.conclusion.is_some()
    }

    /// Campos de contenido con su nombre de almacenamiento; un nodo válido
    /// tiene al menos uno.
    pub fn content(&self) -> [(&'static str, Option<&str>); 4] {
        [
            ("question", self.question.as_deref()),
            ("conclusion", self.conclusion.as_deref()),
            ("advice", self.advice.as_deref()),
            ("comentario_final", self.comentario_final.as_deref()),
        ]
    }

    pub fn has_content(&self) -> bool {
        self.content().iter().any(|(_, value)| value.is_some())
    }

    /// Hijos del nodo, vacío si no tiene.
    pub fn children(&self) -> impl Iterator<Item = (&String, &BranchNode)> {
        self.branches.iter().flat_map(|b| b.iter())
    }

    /// Niveles del subárbol contando este nodo (una hoja tiene profundidad 1).
    pub fn depth(&self) -> usize {
        1 + self.children().map(|(_, c)| c.depth()).max().unwrap_or(0)
    }
}

/// Profundidad de un conjunto de ramas hermanas (0 si está vacío).
pub fn branches_depth(branches: &Branches) -> usize {
    branches.values().map(BranchNode::depth).max().unwrap_or(0)
}

/// Ruta ética completa tal y como la devuelve la API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EthicalRoute {
    #[serde(rename = "documentId")]
    pub document_id: String,
    pub question: String,
    pub description: String,
    pub participations: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub branches: Branches,
}

/// Entrada del listado de rutas (sin el árbol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    #[serde(rename = "documentId")]
    pub document_id: String,
    pub question: String,
    pub description: String,
    pub participations: u64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

/// Ruta validada y normalizada, lista para persistir.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteDraft {
    pub question: String,
    pub description: String,
    pub branches: Branches,
}

/// Actualización parcial validada. Nunca está vacía.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branches: Option<Branches>,
}

impl RouteUpdate {
    pub fn is_empty(&self) -> bool {
        self.question.is_none() && self.description.is_none() && self.branches.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(conclusion: &str) -> BranchNode {
        BranchNode {
            conclusion: Some(conclusion.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn depth_counts_nested_levels() {
        let mut inner = Branches::new();
        inner.insert("si".into(), leaf("ok"));
        let node = BranchNode {
            question: Some("¿Seguro?".into()),
            branches: Some(inner),
            ..Default::default()
        };
        let mut root = Branches::new();
        root.insert("a".into(), node);
        root.insert("b".into(), leaf("fin"));

        assert_eq!(branches_depth(&root), 2);
        assert_eq!(branches_depth(&Branches::new()), 0);
    }

    #[test]
    fn leaf_serializes_without_branches_field() {
        let json = serde_json::to_value(leaf("Riesgo alto")).unwrap();
        assert_eq!(json, serde_json::json!({ "conclusion": "Riesgo alto" }));
    }

    #[test]
    fn answer_label_alone_is_not_content() {
        let label_only = BranchNode {
            answer: Some("Sí".into()),
            ..Default::default()
        };
        assert!(!label_only.has_content());
        assert!(leaf("fin").has_content());
        assert_eq!(leaf("fin").content()[1], ("conclusion", Some("fin")));
    }
}
