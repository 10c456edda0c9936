//! Configuration and I/O errors shared across the workspace

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("missing environment variable {0}")]
    MissingEnv(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_names_the_variable() {
        let err = Error::MissingEnv("FITBIT_CLIENT_ID".into());
        assert_eq!(err.to_string(), "missing environment variable FITBIT_CLIENT_ID");
    }

    #[test]
    fn toml_errors_convert() {
        let parse: std::result::Result<toml::Table, _> = toml::from_str("[store\npath = 1");
        let err: Error = parse.unwrap_err().into();
        assert!(
            err.to_string().starts_with("TOML parse error:"),
            "got: {err}"
        );
    }
}
