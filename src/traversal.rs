//! Máquina de estados que recorre una ruta ética desde la pregunta raíz.
//!
//! `InProgress` mantiene el nodo actual; cada respuesta añade un paso al
//! historial. Al llegar a un nodo con `conclusion` se pasa a `Finished` y se
//! avisa una sola vez al notificador de participaciones. El aviso es "lanzar y
//! olvidar": un fallo nunca cambia el resultado mostrado.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    models::{BranchNode, Branches, EthicalRoute},
    routes::RouteRepository,
};

/// Pasos supuestos para la barra de progreso (sólo cosmético).
pub const ASSUMED_MAX_STEPS: usize = 6;

/// Recibe el aviso de que una sesión ha llegado a una conclusión.
pub trait CompletionNotifier: Send + Sync {
    /// No debe bloquear ni propagar errores.
    fn notify_completion(&self, route_id: &str);
}

/// Un paso del recorrido: la pregunta mostrada y la clave elegida.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathStep {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalState {
    InProgress { current: BranchNode },
    Finished { result: BranchNode },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceOutcome {
    Advanced,
    Finished,
    /// Clave desconocida o sesión ya terminada: no cambia nada.
    Ignored,
}

/// Opción visible para el nodo actual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOption<'a> {
    pub key: &'a str,
    pub label: &'a str,
}

pub struct Traversal {
    route_id: String,
    root: BranchNode,
    state: TraversalState,
    path: Vec<PathStep>,
    notifier: Arc<dyn CompletionNotifier>,
}

impl Traversal {
    pub fn new(route: &EthicalRoute, notifier: Arc<dyn CompletionNotifier>) -> Self {
        Self::from_parts(&route.document_id, &route.question, route.branches.clone(), notifier)
    }

    pub fn from_parts(
        route_id: &str,
        question: &str,
        branches: Branches,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Self {
        let root = BranchNode {
            question: Some(question.to_string()),
            branches: Some(branches),
            ..Default::default()
        };
        Self {
            route_id: route_id.to_string(),
            state: TraversalState::InProgress {
                current: root.clone(),
            },
            root,
            path: Vec::new(),
            notifier,
        }
    }

    pub fn state(&self) -> &TraversalState {
        &self.state
    }

    pub fn path(&self) -> &[PathStep] {
        &self.path
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, TraversalState::Finished { .. })
    }

    /// Nodo en curso mientras el recorrido no ha terminado.
    pub fn current(&self) -> Option<&BranchNode> {
        match &self.state {
            TraversalState::InProgress { current } => Some(current),
            TraversalState::Finished { .. } => None,
        }
    }

    pub fn result(&self) -> Option<&BranchNode> {
        match &self.state {
            TraversalState::Finished { result } => Some(result),
            TraversalState::InProgress { .. } => None,
        }
    }

    /// Respuestas válidas para el nodo actual; sólo éstas deberían ofrecerse.
    pub fn options(&self) -> Vec<AnswerOption<'_>> {
        self.current()
            .map(|node| {
                node.children()
                    .map(|(key, child)| AnswerOption {
                        key,
                        label: child.answer.as_deref().unwrap_or(key),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Porcentaje aproximado de avance, acotado a 100.
    pub fn progress(&self) -> u8 {
        let pct = self.path.len() * 100 / ASSUMED_MAX_STEPS;
        pct.min(100) as u8
    }

    pub fn choose_answer(&mut self, key: &str) -> ChoiceOutcome {
        let TraversalState::InProgress { current } = &self.state else {
            return ChoiceOutcome::Ignored;
        };
        let Some(child) = current.branches.as_ref().and_then(|b| b.get(key)) else {
            debug!("Respuesta '{key}' no disponible en el nodo actual");
            return ChoiceOutcome::Ignored;
        };

        let child = child.clone();
        self.path.push(PathStep {
            question: current.question.clone().unwrap_or_default(),
            answer: key.to_string(),
        });

        if child.is_conclusion() {
            self.state = TraversalState::Finished { result: child };
            self.notifier.notify_completion(&self.route_id);
            ChoiceOutcome::Finished
        } else {
            self.state = TraversalState::InProgress { current: child };
            ChoiceOutcome::Advanced
        }
    }

    /// Vuelve a la pregunta raíz con el historial vacío, termine o no.
    pub fn restart(&mut self) {
        self.state = TraversalState::InProgress {
            current: self.root.clone(),
        };
        self.path.clear();
    }
}

/// Notificador en proceso: incrementa el contador directamente en el almacén.
pub struct RepositoryNotifier {
    routes: RouteRepository,
}

impl RepositoryNotifier {
    pub fn new(routes: RouteRepository) -> Self {
        Self { routes }
    }
}

impl CompletionNotifier for RepositoryNotifier {
    fn notify_completion(&self, route_id: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("Sin runtime de tokio: no se registra la participación en {route_id}");
            return;
        };
        let routes = self.routes.clone();
        let route_id = route_id.to_string();
        handle.spawn(async move {
            match routes.record_participation(&route_id).await {
                Ok(total) => debug!("Participaciones de {route_id}: {total}"),
                Err(e) => warn!("No se pudo registrar la participación en {route_id}: {e}"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl CompletionNotifier for Recorder {
        fn notify_completion(&self, route_id: &str) {
            self.0.lock().unwrap().push(route_id.to_string());
        }
    }

    fn branches(value: serde_json::Value) -> Branches {
        serde_json::from_value(value).unwrap()
    }

    fn scenario(recorder: Arc<Recorder>) -> Traversal {
        Traversal::from_parts(
            "r1",
            "¿Revisaste la documentación?",
            branches(json!({
                "si": { "conclusion": "Buenas prácticas", "advice": "Continúa", "comentario_final": "..." },
                "no": { "conclusion": "Riesgo alto", "advice": "Detente", "comentario_final": "..." }
            })),
            recorder,
        )
    }

    #[test]
    fn single_choice_reaches_conclusion() {
        let recorder = Arc::new(Recorder::default());
        let mut walk = scenario(recorder.clone());

        assert_eq!(walk.choose_answer("si"), ChoiceOutcome::Finished);
        assert_eq!(walk.result().unwrap().conclusion.as_deref(), Some("Buenas prácticas"));
        assert_eq!(
            walk.path(),
            &[PathStep {
                question: "¿Revisaste la documentación?".into(),
                answer: "si".into(),
            }]
        );
        assert_eq!(recorder.0.lock().unwrap().as_slice(), &["r1".to_string()]);
    }

    #[test]
    fn finished_session_ignores_further_choices_and_notifies_once() {
        let recorder = Arc::new(Recorder::default());
        let mut walk = scenario(recorder.clone());
        walk.choose_answer("no");

        assert_eq!(walk.choose_answer("si"), ChoiceOutcome::Ignored);
        assert_eq!(walk.path().len(), 1);
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn unknown_key_is_a_no_op() {
        let recorder = Arc::new(Recorder::default());
        let mut walk = scenario(recorder.clone());
        let before = walk.state().clone();

        assert_eq!(walk.choose_answer("quizas"), ChoiceOutcome::Ignored);
        assert_eq!(walk.state(), &before);
        assert!(walk.path().is_empty());
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn conclusion_ends_walk_even_with_children() {
        let recorder = Arc::new(Recorder::default());
        let mut walk = Traversal::from_parts(
            "r2",
            "¿Empezamos?",
            branches(json!({
                "vale": {
                    "question": "¿Hay datos personales?",
                    "answer": "Vale",
                    "branches": {
                        "si": {
                            "conclusion": "Revisión obligatoria",
                            "branches": { "extra": { "conclusion": "nunca" } }
                        },
                        "no": { "question": "¿Seguro?", "branches": { "si": { "conclusion": "Adelante" } } }
                    }
                }
            })),
            recorder.clone(),
        );

        let labels: Vec<&str> = walk.options().iter().map(|o| o.label).collect();
        assert_eq!(labels, vec!["Vale"]);
        assert_eq!(walk.choose_answer("vale"), ChoiceOutcome::Advanced);
        assert_eq!(walk.current().unwrap().question.as_deref(), Some("¿Hay datos personales?"));
        assert_eq!(walk.choose_answer("si"), ChoiceOutcome::Finished);
        assert_eq!(walk.path().len(), 2);
        assert_eq!(walk.path()[1].question, "¿Hay datos personales?");
        assert!(walk.options().is_empty());
    }

    #[test]
    fn restart_returns_to_initial_state_and_allows_new_completion() {
        let recorder = Arc::new(Recorder::default());
        let mut walk = scenario(recorder.clone());
        let initial = walk.state().clone();

        walk.choose_answer("si");
        assert!(walk.is_finished());
        walk.restart();
        assert_eq!(walk.state(), &initial);
        assert!(walk.path().is_empty());
        assert_eq!(walk.progress(), 0);

        walk.choose_answer("no");
        assert_eq!(recorder.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn progress_is_capped() {
        let mut node = json!({ "conclusion": "fin" });
        for _ in 0..10 {
            node = json!({ "question": "¿Otra?", "branches": { "s": node } });
        }
        let mut walk = Traversal::from_parts(
            "r3",
            "¿Inicio?",
            branches(json!({ "s": node })),
            Arc::new(Recorder::default()),
        );
        for step in 1..=10 {
            walk.choose_answer("s");
            assert!(walk.progress() <= 100);
            if step == 3 {
                assert_eq!(walk.progress(), 50);
            }
        }
        assert_eq!(walk.progress(), 100);
    }
}
