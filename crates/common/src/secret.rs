//! Secret wrapper for client secrets

use std::fmt;
use std::path::Path;

use zeroize::Zeroize;

/// Sensitive value, redacted in Debug/Display and wiped on drop.
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Read a secret from a file, trimming surrounding whitespace.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let mut raw = std::fs::read_to_string(path)?;
        let trimmed = raw.trim().to_string();
        raw.zeroize();
        if trimmed.is_empty() {
            return Err(crate::Error::Config(format!(
                "secret file {} is empty",
                path.display()
            )));
        }
        Ok(Self(trimmed))
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_secret_is_redacted() {
        let secret = Secret::new(String::from("fitbit-client-secret"));
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(secret.to_string(), "[REDACTED]");
        assert_eq!(secret.expose(), "fitbit-client-secret");
    }

    #[test]
    fn from_file_trims_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client_secret");
        std::fs::write(&path, "s3cr3t\n").unwrap();

        let secret = Secret::from_file(&path).unwrap();
        assert_eq!(secret.expose(), "s3cr3t");
    }

    #[test]
    fn from_file_rejects_empty_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty");
        std::fs::write(&empty, "  \n").unwrap();

        assert!(matches!(
            Secret::from_file(&empty),
            Err(crate::Error::Config(_))
        ));
        assert!(matches!(
            Secret::from_file(&dir.path().join("missing")),
            Err(crate::Error::Io(_))
        ));
    }
}
