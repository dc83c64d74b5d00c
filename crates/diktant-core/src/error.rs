use thiserror::Error;

/// Top-level error type for the Diktant workspace.
///
/// Subsystem crates return this type directly so that `?` works across crate
/// boundaries. Recovery into harmless defaults (no progress, no sound, back to
/// the catalog) happens at component boundaries, never by panicking.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiktantError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Content error: {0}")]
    Content(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("{what} timed out after {secs}s")]
    Timeout { what: String, secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for DiktantError {
    fn from(err: toml::de::Error) -> Self {
        DiktantError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DiktantError {
    fn from(err: toml::ser::Error) -> Self {
        DiktantError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for DiktantError {
    fn from(err: serde_json::Error) -> Self {
        DiktantError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Diktant operations.
pub type Result<T> = std::result::Result<T, DiktantError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiktantError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(DiktantError, &str)> = vec![
            (
                DiktantError::Content("lesson 007 missing".to_string()),
                "Content error: lesson 007 missing",
            ),
            (
                DiktantError::Synthesis("backend down".to_string()),
                "Synthesis error: backend down",
            ),
            (
                DiktantError::Audio("no device".to_string()),
                "Audio error: no device",
            ),
            (
                DiktantError::Storage("disk full".to_string()),
                "Storage error: disk full",
            ),
            (
                DiktantError::Session("not active".to_string()),
                "Session error: not active",
            ),
            (
                DiktantError::Timeout {
                    what: "lesson fetch".to_string(),
                    secs: 12,
                },
                "lesson fetch timed out after 12s",
            ),
            (
                DiktantError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "lessons.json");
        let err: DiktantError = io_err.into();
        assert!(matches!(err, DiktantError::Io(_)));
        assert!(err.to_string().starts_with("I/O error:"));
        assert!(err.to_string().contains("lessons.json"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let err: DiktantError = err.unwrap_err().into();
        assert!(matches!(err, DiktantError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let err: DiktantError = err.unwrap_err().into();
        assert!(matches!(err, DiktantError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(value.to_string())
        }

        assert_eq!(inner().unwrap(), "42");
    }
}
