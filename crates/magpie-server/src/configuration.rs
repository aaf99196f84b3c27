use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use magpie::upstream;
use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Failed to parse socket address")
    }
}

#[derive(Debug, Deserialize)]
pub struct UpstreamSettings {
    #[serde(default = "default_upstream_host")]
    pub host: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            host: default_upstream_host(),
            model: default_model(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub upstream: UpstreamSettings,
}

impl Settings {
    /// Load settings from `MAGPIE_*` environment variables, e.g.
    /// `MAGPIE_SERVER__PORT=8080` or `MAGPIE_UPSTREAM__MODEL=qwen2.5`.
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("upstream.host", default_upstream_host())?
            .set_default("upstream.model", default_model())?
            .add_source(
                Environment::with_prefix("MAGPIE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match config.try_deserialize() {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("configuration error: {:?}", &err);
                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_upstream_host() -> String {
    upstream::OLLAMA_HOST.to_string()
}

fn default_model() -> String {
    upstream::DEFAULT_MODEL.to_string()
}
