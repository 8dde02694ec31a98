//! # Media Store
//!
//! Image storage for an app sandbox and the shared gallery.
//!
//! This crate provides:
//! - Private saves into the app-specific pictures directory
//! - Public saves registered in a content index (MediaStore on Android, SQLite elsewhere)
//! - Legacy (absolute path) and scoped (relative path) storage backends, picked by API level
//! - EXIF UserComment tagging of stored JPEGs
//! - A free space and permission gate in front of every write
//!
//! All storage operations run on the blocking worker pool and return a
//! [`TaskHandle`] that discards the result when dropped.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use media_store::{MediaStoreConfig, MediaStoreService};
//!
//! let config = media_store::platform::platform_config(MediaStoreConfig::default());
//! let service = MediaStoreService::open(config)?;
//!
//! let locator = service.save_public("cat", jpeg_bytes, "public.jpg").await?;
//! let tag = service.tag(&locator, "HelloCat").await?;
//! ```

pub mod backend;
pub mod capability;
pub mod commit;
pub mod error;
pub mod exif;
pub mod index;
pub mod layout;
pub mod models;
pub mod platform;
pub mod schema;
pub mod service;
pub mod task;

pub use backend::{select_backend, BackendKind, LegacyBackend, ScopedBackend, StorageBackend};
pub use capability::{
    check_available_local_storage, check_permission, is_all_permission_granted,
    is_permission_granted, DiskSpaceProbe, GrantResult, Permission, PermissionGate, SpaceProbe,
    StaticPermissionGate, VolumeStats, INTERNET, LOCATION, STORAGE,
};
pub use error::MediaStoreError;
pub use exif::{ExifError, NO_DATA};
pub use index::{ContentIndex, SqliteContentIndex};
pub use models::{
    ContentId, IndexRecord, Locator, MediaStoreConfig, SaveRequest, Visibility,
    SCOPED_STORAGE_API_LEVEL,
};
pub use service::MediaStoreService;
pub use task::TaskHandle;
