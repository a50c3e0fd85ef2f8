//! Environment-driven configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONVERT_TIMEOUT_SECS: u64 = 60;

/// Server configuration loaded from the environment (`.env` supported).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub template_dir: PathBuf,
    pub output_dir: PathBuf,
    pub converter_command: String,
    pub convert_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let template_dir = env::var("TEMPLATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./templates"));
        let output_dir = env::var("OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./output/generated_documents"));
        let converter_command =
            env::var("CONVERTER_COMMAND").unwrap_or_else(|_| "soffice".to_string());
        let convert_timeout = env::var("CONVERT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_CONVERT_TIMEOUT_SECS));

        AppConfig {
            database_url: env::var("DATABASE_URL").ok(),
            template_dir,
            output_dir,
            converter_command,
            convert_timeout,
        }
    }

    /// Provision the directories the server writes to. Done once at startup
    /// so request handlers never race on `create_dir_all`.
    pub fn provision_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        std::fs::create_dir_all(&self.template_dir)?;
        Ok(())
    }
}
