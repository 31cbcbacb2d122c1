use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rutas_eticas::{
    api,
    app_state::AppState,
    client::{self, ApiClient, HttpParticipationNotifier},
    config::{AppConfig, StoreBackend},
    store::{DocumentStore, InMemoryStore, Neo4jStore},
    traversal::{ChoiceOutcome, Traversal},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rutas_eticas", about = "Servicio y cliente de rutas éticas")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Arranca el servidor HTTP (por defecto).
    Serve,
    /// Valida un fichero JSON de ruta y lo sube a la API.
    Import {
        file: PathBuf,
        #[command(flatten)]
        remote: Remote,
    },
    /// Recorre una ruta de forma interactiva desde la terminal.
    Walk {
        id: String,
        #[command(flatten)]
        remote: Remote,
    },
}

#[derive(clap::Args)]
struct Remote {
    /// URL base de la API.
    #[arg(long, default_value = "http://127.0.0.1:3322")]
    api: String,
    /// Identidad con la que se firman las peticiones.
    #[arg(long, env = "RUTAS_USER")]
    user: String,
    #[arg(long)]
    role: Option<String>,
}

impl Remote {
    fn client(&self) -> Result<ApiClient> {
        ApiClient::new(&self.api, &self.user, self.role.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Import { file, remote } => import(&file, &remote).await,
        Command::Walk { id, remote } => walk(&id, &remote).await,
    }
}

async fn serve() -> Result<()> {
    // 2. Cargar configuración
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Abrir el almacén de documentos
    let store: Arc<dyn DocumentStore> = match cfg.store_backend {
        StoreBackend::Memory => {
            info!("Usando almacén en memoria (los datos se pierden al reiniciar).");
            Arc::new(InMemoryStore::new())
        }
        StoreBackend::Neo4j => Arc::new(
            Neo4jStore::connect(&cfg)
                .await
                .context("Error conectando a Neo4j")?,
        ),
    };

    // 4. Estado compartido y router
    let app_state = AppState::new(cfg.clone(), store);
    let mut app = api::create_router(app_state).layer(TraceLayer::new_for_http());
    if cfg.cors_allow_any {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    // 5. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}

async fn import(file: &Path, remote: &Remote) -> Result<()> {
    let draft = client::load_route_file(file)?;
    println!("Archivo válido");
    println!("Pregunta principal: {}", draft.question);
    println!("Descripción: {}", draft.description);

    let id = remote.client()?.create_route(&draft).await?;
    println!("Ruta ética creada con éxito: {id}");
    Ok(())
}

async fn walk(id: &str, remote: &Remote) -> Result<()> {
    let api = remote.client()?;
    let route = api.fetch_route(id).await?;
    let notifier = HttpParticipationNotifier::new(api);
    let mut session = Traversal::new(&route, notifier.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}\n{}\n", route.question, route.description);
    loop {
        if let Some(result) = session.result() {
            println!("\n== {} ==", result.conclusion.as_deref().unwrap_or_default());
            for text in [&result.advice, &result.comentario_final].into_iter().flatten() {
                println!("{text}");
            }
            let answers: Vec<&str> = session.path().iter().map(|s| s.answer.as_str()).collect();
            println!("Camino: {}", answers.join(" → "));
            println!("[r] volver a empezar, [q] salir");
        } else {
            let current = session.current().and_then(|n| n.question.as_deref()).unwrap_or_default();
            println!("\nPaso {} ({}%): {current}", session.path().len() + 1, session.progress());
            for (i, option) in session.options().iter().enumerate() {
                println!("  {}. {}", i + 1, option.label);
            }
            println!("[r] volver a empezar, [q] salir");
        }

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "q" => break,
            "r" => session.restart(),
            _ => {
                let key = match input.parse::<usize>() {
                    Ok(n) if n >= 1 => session.options().get(n - 1).map(|o| o.key.to_string()),
                    _ => Some(input.to_string()),
                };
                let outcome = key.map(|k| session.choose_answer(&k));
                if !matches!(outcome, Some(ChoiceOutcome::Advanced | ChoiceOutcome::Finished)) {
                    println!("Opción no válida");
                }
            }
        }
    }

    notifier.wait_pending().await;
    Ok(())
}
