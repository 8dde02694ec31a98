use crate::exif::ExifError;

/// Error type for media store operations
#[derive(Debug)]
pub enum MediaStoreError {
    /// Free space check failed before writing
    InsufficientSpace(String),
    /// Required permissions are not granted
    PermissionDenied(String),
    /// The content index refused to create a record
    RecordCreation(String),
    /// No output stream / descriptor could be opened for a record
    StreamAcquisition(String),
    /// Writing the image bytes failed (record already rolled back)
    StreamWrite(std::io::Error),
    DatabaseError(rusqlite::Error),
    IoError(std::io::Error),
    Metadata(ExifError),
    /// A platform API call failed
    Platform(String),
    /// The background task was cancelled before it completed
    Cancelled,
    Other(String),
}

impl std::fmt::Display for MediaStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaStoreError::InsufficientSpace(msg) => write!(f, "Insufficient space: {}", msg),
            MediaStoreError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            MediaStoreError::RecordCreation(msg) => write!(f, "Record creation failed: {}", msg),
            MediaStoreError::StreamAcquisition(msg) => {
                write!(f, "Failed to get output stream: {}", msg)
            }
            MediaStoreError::StreamWrite(e) => write!(f, "Stream write failed: {}", e),
            MediaStoreError::DatabaseError(e) => write!(f, "Database error: {}", e),
            MediaStoreError::IoError(e) => write!(f, "IO error: {}", e),
            MediaStoreError::Metadata(e) => write!(f, "Metadata error: {}", e),
            MediaStoreError::Platform(msg) => write!(f, "Platform error: {}", msg),
            MediaStoreError::Cancelled => write!(f, "Operation cancelled"),
            MediaStoreError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for MediaStoreError {}

impl From<rusqlite::Error> for MediaStoreError {
    fn from(err: rusqlite::Error) -> Self {
        MediaStoreError::DatabaseError(err)
    }
}

impl From<std::io::Error> for MediaStoreError {
    fn from(err: std::io::Error) -> Self {
        MediaStoreError::IoError(err)
    }
}

impl From<ExifError> for MediaStoreError {
    fn from(err: ExifError) -> Self {
        MediaStoreError::Metadata(err)
    }
}
