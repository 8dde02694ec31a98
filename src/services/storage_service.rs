use crate::error::AppError;
use crate::filesystem;
use crate::sample_image::to_data_url;
use media_store::{Locator, MediaStoreError, MediaStoreService, NO_DATA, STORAGE};
use std::sync::OnceLock;
use std::time::Duration;

/// Request code of the startup storage permission request
pub const STORAGE_REQUEST_CODE: i32 = 1001;

pub const PRIVATE_OWNER: &str = "hello";
pub const PRIVATE_FILE_NAME: &str = "private.jpg";
pub const PUBLIC_FOLDER: &str = "cat";
pub const PUBLIC_FILE_NAME: &str = "public.jpg";
pub const PUBLIC_TAG: &str = "HelloCat";

/// Pause between a public save and tagging it, the index may still be settling
pub const TAG_DELAY: Duration = Duration::from_millis(300);

// Global storage service
static STORAGE_SERVICE: OnceLock<MediaStoreService> = OnceLock::new();

/// Initialize the storage service from `storage.toml` or the platform defaults
pub fn init_storage_service() -> Result<&'static MediaStoreService, AppError> {
    if let Some(service) = STORAGE_SERVICE.get() {
        return Ok(service);
    }

    let config = filesystem::load_storage_config()?;
    log::info!(
        "Storage service: app folder {}, api level {}",
        config.app_name,
        config.api_level
    );
    let service = MediaStoreService::open(config).map_err(convert_error)?;
    Ok(STORAGE_SERVICE.get_or_init(|| service))
}

/// Adapter function to convert MediaStoreError to AppError
pub fn convert_error(e: MediaStoreError) -> AppError {
    match e {
        MediaStoreError::InsufficientSpace(msg) => AppError::InsufficientSpace(msg),
        MediaStoreError::PermissionDenied(msg) => AppError::PermissionDenied(msg),
        MediaStoreError::RecordCreation(msg) | MediaStoreError::StreamAcquisition(msg) => {
            AppError::Storage(msg)
        }
        MediaStoreError::StreamWrite(e) => AppError::Storage(format!("Write failed: {}", e)),
        MediaStoreError::DatabaseError(e) => AppError::Database(e),
        MediaStoreError::IoError(e) => AppError::Filesystem(e),
        MediaStoreError::Metadata(e) => AppError::Other(format!("Metadata error: {}", e)),
        MediaStoreError::Platform(msg) => AppError::Other(msg),
        MediaStoreError::Cancelled => AppError::Cancelled,
        MediaStoreError::Other(msg) => AppError::Other(msg),
    }
}

/// Ask for the storage permissions that are still missing
pub fn request_storage_permissions() -> Result<bool, AppError> {
    let service = init_storage_service()?;
    Ok(service.check_permission(STORAGE, STORAGE_REQUEST_CODE))
}

/// What the screen shows for a stored image
#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    pub locator: Locator,
    pub uri: String,
    pub tag: String,
    pub data_url: Option<String>,
}

impl StoredImage {
    /// `"<locator> : <tag>"`
    pub fn caption(&self) -> String {
        format!("{} : {}", self.uri, self.tag)
    }
}

/// Collect uri, tag and a preview of a stored image
///
/// An unreadable image still describes: without preview and tagged [`NO_DATA`].
pub async fn describe(
    service: &MediaStoreService,
    locator: Locator,
) -> Result<StoredImage, AppError> {
    let data_url = match service.read(&locator).await {
        Ok(bytes) => Some(to_data_url(&bytes)),
        Err(e) => {
            log::warn!("Could not read {}: {}", locator, e);
            None
        }
    };
    let tag = match service.read_tag(&locator).await {
        Ok(tag) => tag,
        Err(e) => {
            log::warn!("Could not read the tag of {}: {}", locator, e);
            NO_DATA.to_string()
        }
    };

    Ok(StoredImage {
        uri: service.locator_uri(&locator),
        locator,
        tag,
        data_url,
    })
}

pub async fn save_private(
    service: &MediaStoreService,
    bytes: Vec<u8>,
) -> Result<StoredImage, AppError> {
    let locator = service
        .save_private(PRIVATE_OWNER, bytes, PRIVATE_FILE_NAME)
        .await
        .map_err(convert_error)?;
    describe(service, locator).await
}

/// Save into the public folder, wait [`TAG_DELAY`] and tag the image
pub async fn save_public(
    service: &MediaStoreService,
    bytes: Vec<u8>,
) -> Result<StoredImage, AppError> {
    let locator = service
        .save_public(PUBLIC_FOLDER, bytes, PUBLIC_FILE_NAME)
        .await
        .map_err(convert_error)?;

    tokio::time::sleep(TAG_DELAY).await;

    let tag = service
        .tag(&locator, PUBLIC_TAG)
        .await
        .map_err(convert_error)?;
    if tag == NO_DATA {
        log::warn!("{} carries no metadata block", locator);
    }
    describe(service, locator).await
}

/// Remove the public image, returns the locator that was removed
///
/// Uses the raw file path where available and the index lookup otherwise.
pub async fn remove_public(service: &MediaStoreService) -> Result<Option<Locator>, AppError> {
    let locator = match service.file_path_locator(PUBLIC_FOLDER, PUBLIC_FILE_NAME) {
        Some(locator) => Some(locator),
        None => service
            .resolve(PUBLIC_FOLDER, PUBLIC_FILE_NAME)
            .await
            .map_err(convert_error)?,
    };

    if let Some(locator) = &locator {
        service.remove(locator).await.map_err(convert_error)?;
        log::info!("Removed {}", locator);
    }
    Ok(locator)
}

pub async fn lookup_public(service: &MediaStoreService) -> Result<Option<StoredImage>, AppError> {
    let resolved = service
        .resolve(PUBLIC_FOLDER, PUBLIC_FILE_NAME)
        .await
        .map_err(convert_error)?;

    match resolved {
        Some(locator) if service.exists(&locator).await.map_err(convert_error)? => {
            Ok(Some(describe(service, locator).await?))
        }
        _ => Ok(None),
    }
}
