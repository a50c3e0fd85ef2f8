use std::path::PathBuf;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::Compress;
use actix_web::{http::header, web, App, HttpServer};
use actix_web_prometheus::PrometheusMetricsBuilder;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

pub mod api;
pub mod config;
pub mod convert;
pub mod letters;
pub mod pipeline;
pub mod registry;
pub mod render;
pub mod sequence;
pub mod storage;
pub mod template;
pub mod watermark;
pub mod workflow;

use crate::config::AppConfig;
use crate::convert::PdfConverter;
use crate::pipeline::Pipeline;
use crate::registry::{DocumentRegistry, InMemoryRegistry, PgDirectory, PgRegistry};
use crate::template::TemplateStore;
use crate::workflow::{RoleDirectory, StaticDirectory, WorkflowEngine};

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error: error_type.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn not_found(message: &str) -> Self {
        Self::new("NotFound", message)
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new("BadRequest", message)
    }

    pub fn internal_error(message: &str) -> Self {
        Self::new("InternalServerError", message)
    }
}

pub struct AppState {
    pub pipeline: Pipeline,
    pub workflow: WorkflowEngine,
    pub registry: Arc<dyn DocumentRegistry>,
    pub output_dir: PathBuf,
}

impl AppState {
    /// Wire the application from configuration. With a database URL the
    /// registry and role directory are Postgres-backed; without one the
    /// server runs on in-memory state (useful for demos and tests).
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let (registry, directory): (Arc<dyn DocumentRegistry>, Arc<dyn RoleDirectory>) =
            match &config.database_url {
                Some(url) => {
                    let pool = PgPoolOptions::new()
                        .max_connections(10)
                        .connect(url)
                        .await?;
                    (
                        Arc::new(PgRegistry::new(pool.clone())),
                        Arc::new(PgDirectory::new(pool)),
                    )
                }
                None => {
                    log::warn!("DATABASE_URL not set, using in-memory registry");
                    (
                        Arc::new(InMemoryRegistry::new()),
                        Arc::new(StaticDirectory::default()),
                    )
                }
            };

        let templates = TemplateStore::new(&config.template_dir);
        let converter = PdfConverter::new(config.converter_command.clone(), config.convert_timeout);
        let pipeline = Pipeline::new(
            templates,
            converter,
            registry.clone(),
            config.output_dir.clone(),
        );
        let workflow = WorkflowEngine::new(registry.clone(), directory);

        Ok(Self {
            pipeline,
            workflow,
            registry,
            output_dir: config.output_dir.clone(),
        })
    }
}

pub async fn run() -> std::io::Result<()> {
    unsafe {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    #[derive(OpenApi)]
    #[openapi(
        paths(
            crate::api::handlers::generate_letter,
            crate::api::handlers::next_number,
            crate::api::handlers::list_templates,
            crate::api::handlers::create_draft,
            crate::api::handlers::submit_document,
            crate::api::handlers::approve_document,
            crate::api::handlers::reject_document,
            crate::api::handlers::generate_document,
            crate::api::handlers::get_document,
            crate::api::handlers::get_history,
            crate::api::handlers::get_approvals,
            crate::api::handlers::download_document
        ),
        components(
            schemas(
                api::models::GenerateRequest,
                api::models::DraftRequest,
                api::models::SubmitRequest,
                api::models::DecisionRequest,
                api::models::NextNumberResponse,
                api::models::TemplateListResponse,
                template::Template,
                registry::Document,
                registry::DocumentStatus,
                registry::ApprovalStep,
                registry::StepStatus,
                registry::HistoryEntry,
                registry::ActorRef,
                registry::Role,
                letters::LetterType,
                ErrorResponse,
            )
        ),
        tags(
            (name = "Letter Service", description = "Letter generation and numbering endpoints."),
            (name = "Workflow Service", description = "Draft, approval and download endpoints.")
        ),
        servers(
            (url = "http://127.0.0.1:8080", description = "Localhost server")
        )
    )]
    struct ApiDoc;

    let config = AppConfig::from_env();
    if let Err(e) = config.provision_dirs() {
        log::error!("Failed to provision template/output directories: {e}");
        std::process::exit(1);
    }

    let app_state = match AppState::from_config(&config).await {
        Ok(state) => web::Data::new(state),
        Err(e) => {
            log::error!("Failed to connect to database. Please check your DATABASE_URL in .env and ensure the database is running. Error: {}", e);
            std::process::exit(1);
        }
    };

    let prometheus = PrometheusMetricsBuilder::new("fakultas_surat_server")
        .endpoint("/metrics")
        .build()
        .expect("Failed to create Prometheus metrics middleware");

    log::info!("Starting server at http://0.0.0.0:8080");

    HttpServer::new(move || {
        let app_state = app_state.clone();
        let prometheus = prometheus.clone();
        let cors = Cors::default()
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://localhost:3000")
            .allowed_origin("http://localhost:8080")
            .allowed_origin("http://127.0.0.1:8080")
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                header::AUTHORIZATION,
                header::ACCEPT,
                header::CONTENT_TYPE,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Compress::default())
            .wrap(prometheus)
            .wrap(cors)
            .app_data(app_state)
            .service(
                web::scope("/api")
                    .service(
                        web::resource("/templates")
                            .route(web::get().to(api::handlers::list_templates)),
                    )
                    .service(
                        web::resource("/surat/{tipe}/generate")
                            .route(web::post().to(api::handlers::generate_letter)),
                    )
                    .service(
                        web::resource("/surat/{tipe}/next-number")
                            .route(web::get().to(api::handlers::next_number)),
                    )
                    .service(
                        web::resource("/surat/{tipe}/draft")
                            .route(web::post().to(api::handlers::create_draft)),
                    )
                    .service(
                        web::resource("/documents/{id}/submit")
                            .route(web::post().to(api::handlers::submit_document)),
                    )
                    .service(
                        web::resource("/documents/{id}/approve")
                            .route(web::post().to(api::handlers::approve_document)),
                    )
                    .service(
                        web::resource("/documents/{id}/reject")
                            .route(web::post().to(api::handlers::reject_document)),
                    )
                    .service(
                        web::resource("/documents/{id}/generate")
                            .route(web::post().to(api::handlers::generate_document)),
                    )
                    .service(
                        web::resource("/documents/{id}/history")
                            .route(web::get().to(api::handlers::get_history)),
                    )
                    .service(
                        web::resource("/documents/{id}/approvals")
                            .route(web::get().to(api::handlers::get_approvals)),
                    )
                    .service(
                        web::resource("/documents/{id}/download")
                            .route(web::get().to(api::handlers::download_document)),
                    )
                    .service(
                        web::resource("/documents/{id}")
                            .route(web::get().to(api::handlers::get_document)),
                    ),
            )
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
    })
    .backlog(8192)
    .max_connections(25000)
    .keep_alive(actix_web::http::KeepAlive::Os)
    .bind(("0.0.0.0", 8080))?
    .run()
    .await
}
