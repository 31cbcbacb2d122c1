//! Rutas éticas: árboles de decisión con preguntas ramificadas que terminan en
//! conclusiones, publicados por una organización y recorridos por los
//! participantes.

pub mod api;
pub mod app_state;
pub mod assemble;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod routes;
pub mod store;
pub mod traversal;
pub mod validation;
