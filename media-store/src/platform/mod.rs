//! Platform integration
//!
//! On Android the content index, space probe and permission gate talk to the
//! system through JNI. Desktop builds use the SQLite index, `sysinfo` and an
//! in-memory permission gate that grants everything.

#[cfg(target_os = "android")]
mod android;

#[cfg(target_os = "android")]
pub use android::{AndroidPermissionGate, AndroidSpaceProbe, MediaStoreIndex};

use crate::capability::{PermissionGate, SpaceProbe};
use crate::error::MediaStoreError;
use crate::index::ContentIndex;
use crate::models::MediaStoreConfig;
use std::sync::Arc;

/// Platform implementations handed to the service
pub struct PlatformServices {
    pub index: Arc<dyn ContentIndex>,
    pub space: Arc<dyn SpaceProbe>,
    pub permissions: Arc<dyn PermissionGate>,
}

/// Fill in directories and API level reported by the platform
///
/// Values that cannot be queried keep what `base` had.
#[cfg(target_os = "android")]
pub fn platform_config(base: MediaStoreConfig) -> MediaStoreConfig {
    android::apply_platform_config(base)
}

#[cfg(not(target_os = "android"))]
pub fn platform_config(base: MediaStoreConfig) -> MediaStoreConfig {
    base
}

#[cfg(target_os = "android")]
pub fn open_platform_services(
    _config: &MediaStoreConfig,
) -> Result<PlatformServices, MediaStoreError> {
    Ok(PlatformServices {
        index: Arc::new(MediaStoreIndex::new()),
        space: Arc::new(AndroidSpaceProbe),
        permissions: Arc::new(AndroidPermissionGate),
    })
}

#[cfg(not(target_os = "android"))]
pub fn open_platform_services(
    config: &MediaStoreConfig,
) -> Result<PlatformServices, MediaStoreError> {
    use crate::capability::{DiskSpaceProbe, StaticPermissionGate, LOCATION, STORAGE};
    use crate::index::SqliteContentIndex;

    let index = SqliteContentIndex::open(&config.index_path, &config.external_root)?;
    let permissions = StaticPermissionGate::granting(STORAGE);
    for permission in LOCATION {
        permissions.grant(*permission);
    }

    Ok(PlatformServices {
        index: Arc::new(index),
        space: Arc::new(DiskSpaceProbe::new(
            &config.external_root,
            &config.internal_root,
        )),
        permissions: Arc::new(permissions),
    })
}

/// Whether the primary external volume is mounted and writable
#[cfg(target_os = "android")]
pub fn is_external_storage_mounted(_config: &MediaStoreConfig) -> bool {
    android::is_external_storage_mounted()
}

#[cfg(not(target_os = "android"))]
pub fn is_external_storage_mounted(config: &MediaStoreConfig) -> bool {
    std::fs::create_dir_all(&config.external_root).is_ok() && config.external_root.is_dir()
}
