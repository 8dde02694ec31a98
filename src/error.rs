use std::fmt;

/// Central error type of the storage showcase app
#[derive(Debug)]
pub enum AppError {
    /// Content index database error (rusqlite)
    Database(rusqlite::Error),
    /// Filesystem error
    Filesystem(std::io::Error),
    /// Not enough free space for a write
    InsufficientSpace(String),
    /// Permission denied (e.g. external storage)
    PermissionDenied(String),
    /// The image could not be stored
    Storage(String),
    /// Sample image could not be produced
    ImageProcessing(String),
    /// Configuration could not be read
    Config(String),
    /// Operation was dropped before it finished
    Cancelled,
    /// General error
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AppError::Database(e) => write!(f, "Database error: {}", e),
            AppError::Filesystem(e) => write!(f, "Filesystem error: {}", e),
            AppError::InsufficientSpace(msg) => write!(f, "Insufficient space: {}", msg),
            AppError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::ImageProcessing(msg) => write!(f, "Image processing error: {}", msg),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Cancelled => write!(f, "Cancelled"),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e)
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Filesystem(e)
    }
}

impl From<toml::de::Error> for AppError {
    fn from(e: toml::de::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

/// User-friendly error messages for the UI
impl AppError {
    pub fn user_message(&self) -> String {
        match self {
            AppError::Database(_) => "A database error occurred. Please try again.".to_string(),
            AppError::Filesystem(_) => {
                "Error accessing files. Please check app permissions.".to_string()
            }
            AppError::InsufficientSpace(msg) => msg.clone(),
            AppError::PermissionDenied(msg) => format!("Permission required: {}", msg),
            AppError::Storage(msg) => msg.clone(),
            AppError::ImageProcessing(_) => "Error processing image.".to_string(),
            AppError::Config(msg) => format!("Invalid storage.toml: {}", msg),
            AppError::Cancelled => "Operation cancelled.".to_string(),
            AppError::Other(msg) => msg.clone(),
        }
    }
}
