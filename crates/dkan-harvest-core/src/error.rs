use thiserror::Error;

/// Application-wide error types.
///
/// Every failure in the pipeline is scoped to the smallest enclosing unit of
/// work. The variants map onto those scopes:
///
/// - [`AppError::Transport`] and [`AppError::Search`] end one search attempt
/// - [`AppError::NoDatasetsFound`] ends a gather job
/// - [`AppError::Conversion`] drops a single package
/// - [`AppError::Validation`] fails a single harvest object
/// - [`AppError::NotFound`] is an expected answer from local lookups
///
/// # Error Conversion
///
/// - `sqlx::Error` → `AppError::DatabaseError`
/// - `serde_json::Error` → `AppError::SerializationError`
///
/// # Examples
///
/// ```
/// use dkan_harvest_core::error::AppError;
///
/// let err = AppError::NotFound("group climate".to_string());
/// assert!(err.is_not_found());
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Fetching a URL failed at the network or HTTP level.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Paging through the remote search API failed.
    ///
    /// Raised for transport failures while paging, non-JSON payloads, pages
    /// without a `result` array, or a remote that ignores the offset parameter.
    #[error("Search error: {0}")]
    Search(String),

    /// A full remote search returned no datasets at all.
    #[error("No datasets found at remote: {0}")]
    NoDatasetsFound(String),

    /// A remote package could not be converted to the local schema.
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// The local action API rejected a payload.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The local action API has no entity with the requested id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A remote group or organization record could not be retrieved.
    #[error("Remote resource error: {0}")]
    RemoteResource(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Configuration file or harvest source configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic application error for cases not covered by specific variants.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns true for "no such entity" answers from the local action API.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }

    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("connection") {
                    "Cannot connect to database. Is PostgreSQL running?\n   Check DATABASE_URL."
                        .to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::Transport(msg) => {
                format!(
                    "Cannot reach the remote catalog: {}\n   Check your internet connection and the source URL.",
                    msg
                )
            }
            AppError::Search(msg) => {
                format!(
                    "The remote search API misbehaved: {}\n   The source may not be a DKAN instance.",
                    msg
                )
            }
            AppError::NoDatasetsFound(url) => {
                format!("No datasets found at {}.\n   Check the organization filters.", url)
            }
            AppError::ConfigError(msg) => {
                format!(
                    "Configuration error: {}\n   Check your harvest sources file.",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }
}
