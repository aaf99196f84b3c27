use crate::configuration::Settings;
use magpie::errors::ChatResult;
use magpie::upstream::OllamaBackend;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub backend: OllamaBackend,
    pub default_model: String,
}

impl AppState {
    pub fn new(settings: &Settings) -> ChatResult<Self> {
        Ok(Self {
            backend: OllamaBackend::new(settings.upstream.host.clone())?,
            default_model: settings.upstream.model.clone(),
        })
    }
}
