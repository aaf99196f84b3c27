use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing configuration value: set {env_var}")]
    MissingEnvVar { env_var: String },

    #[error(transparent)]
    Other(#[from] config::ConfigError),
}

/// Map a dotted settings path to the environment variable that sets it.
pub fn to_env_var(field: &str) -> String {
    format!("MAGPIE_{}", field.replace('.', "__").to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_hint_uses_prefix_and_double_underscore() {
        assert_eq!(to_env_var("server.port"), "MAGPIE_SERVER__PORT");
        assert_eq!(to_env_var("upstream.host"), "MAGPIE_UPSTREAM__HOST");
    }
}
