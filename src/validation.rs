//! Validación de rutas éticas y de sus árboles de ramas.
//!
//! Recibe JSON arbitrario ya parseado y devuelve el árbol normalizado
//! (textos recortados, `answer` por defecto igual a la clave, sin mapas de
//! ramas vacíos) o la lista completa de errores con la ruta de claves que
//! los provoca (`branches.si.no`). No tiene efectos secundarios.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    models::{BranchNode, Branches, RouteDraft, RouteUpdate, MAX_BRANCH_DEPTH},
    store::is_valid_id,
};

/// Error de validación asociado a un campo o nodo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "Campo '{}': {}", self.path, self.message)
        }
    }
}

/// Conjunto de errores acumulados durante una validación.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.push(path, message);
        errors
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// Primer mensaje para un campo de primer nivel (lo que muestra un formulario).
    pub fn first_for(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.path == field || e.path.starts_with(&format!("{field}.")))
            .map(|e| e.message.as_str())
    }

    /// Todos los errores en un único texto, uno por línea (flujo de importación).
    pub fn joined(&self) -> String {
        let lines: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        format!("Error de validación:\n{}", lines.join("\n"))
    }

    fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.joined())
    }
}

impl std::error::Error for ValidationErrors {}

/// Valida el cuerpo de creación de una ruta. `participations` y cualquier
/// otro campo desconocido se descartan.
pub fn validate_route(value: &Value) -> Result<RouteDraft, ValidationErrors> {
    let Some(obj) = value.as_object() else {
        return Err(ValidationErrors::single("", "Se esperaba un objeto JSON"));
    };
    let mut errors = ValidationErrors::default();

    let question = required_text(obj, "question", "La pregunta es requerida", &mut errors);
    let description = required_text(obj, "description", "La descripción es requerida", &mut errors);

    let branches = match obj.get("branches") {
        None | Some(Value::Null) => {
            errors.push("branches", "Debe haber al menos una rama");
            Branches::new()
        }
        Some(raw) => {
            let branches = validate_branches(raw, "branches", 1, &mut errors);
            if raw.as_object().is_some_and(Map::is_empty) {
                errors.push("branches", "Debe haber al menos una rama");
            }
            branches
        }
    };

    errors.into_result(RouteDraft {
        question: question.unwrap_or_default(),
        description: description.unwrap_or_default(),
        branches,
    })
}

/// Valida el cuerpo de una actualización parcial. Puede devolver una
/// actualización vacía; rechazarla es cosa de quien la aplica.
pub fn validate_update(value: &Value) -> Result<RouteUpdate, ValidationErrors> {
    let Some(obj) = value.as_object() else {
        return Err(ValidationErrors::single("", "Se esperaba un objeto JSON"));
    };
    let mut errors = ValidationErrors::default();
    let mut update = RouteUpdate::default();

    if has_value(obj, "question") {
        update.question = required_text(obj, "question", "La pregunta no puede estar vacía", &mut errors);
    }
    if has_value(obj, "description") {
        update.description =
            required_text(obj, "description", "La descripción no puede estar vacía", &mut errors);
    }
    if let Some(raw) = obj.get("branches").filter(|v| !v.is_null()) {
        let branches = validate_branches(raw, "branches", 1, &mut errors);
        if raw.as_object().is_some_and(Map::is_empty) {
            errors.push("branches", "Debe haber al menos una rama");
        }
        update.branches = Some(branches);
    }

    errors.into_result(update)
}

/// Valida recursivamente un mapa clave → rama. `depth` es el nivel de los
/// nodos de este mapa (1 para las ramas de primer nivel).
pub fn validate_branches(
    value: &Value,
    path: &str,
    depth: usize,
    errors: &mut ValidationErrors,
) -> Branches {
    let mut branches = Branches::new();
    let Some(obj) = value.as_object() else {
        errors.push(path, "Debe ser un objeto de ramas");
        return branches;
    };
    if obj.is_empty() {
        return branches;
    }
    if depth > MAX_BRANCH_DEPTH {
        errors.push(
            path,
            format!("Profundidad máxima de {MAX_BRANCH_DEPTH} niveles excedida"),
        );
        return branches;
    }

    for (key, raw) in obj {
        let child_path = join_path(path, key);
        if let Some(message) = key_problem(key) {
            errors.push(child_path, message);
            continue;
        }
        if let Some(node) = validate_node(key, raw, &child_path, depth, errors) {
            branches.insert(key.clone(), node);
        }
    }
    branches
}

fn validate_node(
    key: &str,
    value: &Value,
    path: &str,
    depth: usize,
    errors: &mut ValidationErrors,
) -> Option<BranchNode> {
    let Some(obj) = value.as_object() else {
        errors.push(path, "Cada rama debe ser un objeto");
        return None;
    };
    let before = errors.len();

    let mut node = BranchNode {
        question: optional_text(obj, "question", path, errors),
        answer: optional_text(obj, "answer", path, errors),
        conclusion: optional_text(obj, "conclusion", path, errors),
        advice: optional_text(obj, "advice", path, errors),
        comentario_final: optional_text(obj, "comentario_final", path, errors),
        branches: None,
    };

    if !node.has_content() && errors.len() == before {
        errors.push(
            path,
            "La rama debe tener al menos una pregunta, conclusión, consejo o comentario final",
        );
    }

    if let Some(raw) = obj.get("branches").filter(|v| !v.is_null()) {
        let children = validate_branches(raw, &join_path(path, "branches"), depth + 1, errors);
        if !children.is_empty() {
            node.branches = Some(children);
        }
    }

    // La etiqueta visible de la respuesta es la clave si no se indica otra.
    if node.answer.is_none() {
        node.answer = Some(key.to_string());
    }
    Some(node)
}

fn key_problem(key: &str) -> Option<&'static str> {
    if key.trim().is_empty() {
        Some("La clave de la rama no puede estar vacía")
    } else if !is_valid_id(key) {
        Some("La clave de la rama no puede contener '/' ni '.'")
    } else {
        None
    }
}

fn has_value(obj: &Map<String, Value>, field: &str) -> bool {
    obj.get(field).is_some_and(|v| !v.is_null())
}

fn required_text(
    obj: &Map<String, Value>,
    field: &str,
    message: &str,
    errors: &mut ValidationErrors,
) -> Option<String> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            errors.push(field, message);
            None
        }
        Some(_) => {
            errors.push(field, "Debe ser texto");
            None
        }
    }
}

fn optional_text(
    obj: &Map<String, Value>,
    field: &str,
    path: &str,
    errors: &mut ValidationErrors,
) -> Option<String> {
    match obj.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::String(_)) => {
            errors.push(join_path(path, field), "No puede estar vacío");
            None
        }
        Some(_) => {
            errors.push(join_path(path, field), "Debe ser texto");
            None
        }
    }
}

fn join_path(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{base}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scenario() -> Value {
        json!({
            "question": "  ¿Revisaste la documentación?  ",
            "description": "Ruta de prueba",
            "participations": 42,
            "branches": {
                "si": { "conclusion": "Buenas prácticas", "advice": "Continúa", "comentario_final": "..." },
                "no": { "conclusion": "Riesgo alto", "advice": "Detente", "comentario_final": "..." }
            }
        })
    }

    fn nested(depth: usize) -> Value {
        let mut node = json!({ "conclusion": "fin" });
        for _ in 1..depth {
            node = json!({ "question": "¿Seguir?", "branches": { "si": node } });
        }
        json!({ "paso": node })
    }

    #[test]
    fn valid_route_is_trimmed_and_answers_default_to_keys() {
        let draft = validate_route(&scenario()).expect("ruta válida");
        assert_eq!(draft.question, "¿Revisaste la documentación?");
        assert_eq!(draft.branches.len(), 2);
        assert_eq!(draft.branches["si"].answer.as_deref(), Some("si"));
        assert_eq!(draft.branches["no"].conclusion.as_deref(), Some("Riesgo alto"));
        assert!(draft.branches["si"].branches.is_none());
    }

    #[test]
    fn missing_top_level_fields_are_reported() {
        let errors = validate_route(&json!({ "question": " ", "branches": {} })).unwrap_err();
        assert_eq!(errors.first_for("question"), Some("La pregunta es requerida"));
        assert_eq!(errors.first_for("description"), Some("La descripción es requerida"));
        assert_eq!(errors.first_for("branches"), Some("Debe haber al menos una rama"));
    }

    #[test]
    fn node_without_content_points_at_its_path() {
        let value = json!({
            "question": "q",
            "description": "d",
            "branches": {
                "si": { "question": "¿Y luego?", "branches": { "no": { "answer": "No" } } }
            }
        });
        let errors = validate_route(&value).unwrap_err();
        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["branches.si.branches.no"]);
    }

    #[test]
    fn empty_strings_and_bad_types_are_rejected() {
        let value = json!({
            "question": "q",
            "description": "d",
            "branches": { "a": { "conclusion": "  " }, "b": 3, "c/d": { "advice": "x" } }
        });
        let errors = validate_route(&value).unwrap_err();
        assert!(errors.iter().any(|e| e.path == "branches.a.conclusion"));
        assert!(errors.iter().any(|e| e.path == "branches.b" && e.message.contains("objeto")));
        assert!(errors.iter().any(|e| e.path == "branches.c/d"));
        assert!(errors.joined().starts_with("Error de validación:\nCampo 'branches."));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut errors = ValidationErrors::default();
        let ok = validate_branches(&nested(MAX_BRANCH_DEPTH), "branches", 1, &mut errors);
        assert!(errors.is_empty());
        assert_eq!(crate::models::branches_depth(&ok), MAX_BRANCH_DEPTH);

        validate_branches(&nested(MAX_BRANCH_DEPTH + 1), "branches", 1, &mut errors);
        assert_eq!(errors.len(), 1);
        assert!(errors.iter().all(|e| e.message.contains("Profundidad")));
    }

    #[test]
    fn update_keeps_only_supplied_fields() {
        let update = validate_update(&json!({ "description": " nueva ", "participations": 99 })).unwrap();
        assert_eq!(update.description.as_deref(), Some("nueva"));
        assert!(update.question.is_none() && update.branches.is_none());

        assert!(validate_update(&json!({})).unwrap().is_empty());
        assert!(validate_update(&json!({ "question": "" })).is_err());
        assert!(validate_update(&json!({ "branches": {} })).is_err());
    }
}
