use std::str::FromStr;

use anyhow::Context;

use crate::session::RECORDING_CEILING_SECS;

pub const DEFAULT_CAPTURE_COMMAND: &str =
    "ffmpeg -loglevel error -f pulse -i default -ac 1 -c:a libopus -b:a 24k -f webm pipe:1";
pub const DEFAULT_ANALYSIS_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_ANALYSIS_MODEL: &str = "gemini-2.5-flash";

/// Settings shared by every subcommand.
///
/// | Env Var                    | Default                 |
/// |----------------------------|-------------------------|
/// | `DATABASE_URL`             | required                |
/// | `DATABASE_MAX_CONNECTIONS` | `5`                     |
/// | `RECORDING_SECONDS`        | `2700`                  |
/// | `CAPTURE_COMMAND`          | ffmpeg from PulseAudio  |
/// | `CAPTURE_MIME_TYPE`        | `audio/webm`            |
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub recording_secs: u32,
    pub capture_command: String,
    pub capture_mime_type: String,
}

/// Settings for the hosted analysis model, only needed by `record`.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
}

fn var_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value: {raw}")),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;
        let recording_secs = var_or("RECORDING_SECONDS", RECORDING_CEILING_SECS)?;
        anyhow::ensure!(recording_secs > 0, "RECORDING_SECONDS must be positive");

        Ok(Self {
            database_url,
            max_connections: var_or("DATABASE_MAX_CONNECTIONS", 5)?,
            recording_secs,
            capture_command: var_or("CAPTURE_COMMAND", DEFAULT_CAPTURE_COMMAND.to_string())?,
            capture_mime_type: var_or("CAPTURE_MIME_TYPE", "audio/webm".to_string())?,
        })
    }
}

impl AnalysisConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("ANALYSIS_API_KEY")
            .context("ANALYSIS_API_KEY must be set to record and analyze sessions")?;

        Ok(Self {
            api_key,
            model: var_or("ANALYSIS_MODEL", DEFAULT_ANALYSIS_MODEL.to_string())?,
            endpoint: var_or("ANALYSIS_ENDPOINT", DEFAULT_ANALYSIS_ENDPOINT.to_string())?,
        })
    }
}
