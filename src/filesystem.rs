use crate::error::AppError;
use media_store::platform::platform_config;
use media_store::MediaStoreConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the optional configuration file in the app data directory
pub const CONFIG_FILE_NAME: &str = "storage.toml";

/// Storage configuration with the directories of the current platform
pub fn platform_defaults() -> MediaStoreConfig {
    platform_config(MediaStoreConfig::default())
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

/// Load the storage configuration
///
/// Keys present in `storage.toml` override the platform defaults, everything
/// else is taken from the platform.
pub fn load_storage_config() -> Result<MediaStoreConfig, AppError> {
    let defaults = platform_defaults();
    let path = config_path(&defaults.internal_root);

    if !path.exists() {
        log::info!("No {} found, using platform defaults", path.display());
        return Ok(defaults);
    }

    log::info!("Loading storage configuration from {}", path.display());
    let text = fs::read_to_string(&path)?;
    merge_config(defaults, &text)
}

/// Overlay the keys of a TOML document onto `defaults`
pub fn merge_config(
    defaults: MediaStoreConfig,
    overrides: &str,
) -> Result<MediaStoreConfig, AppError> {
    let overrides: toml::Table = toml::from_str(overrides)?;
    let mut merged =
        toml::Value::try_from(&defaults).map_err(|e| AppError::Config(e.to_string()))?;

    if let toml::Value::Table(table) = &mut merged {
        for (key, value) in overrides {
            table.insert(key, value);
        }
    }

    Ok(merged.try_into()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_unset_defaults() {
        let defaults = MediaStoreConfig {
            external_root: PathBuf::from("/storage/emulated/0"),
            ..MediaStoreConfig::default()
        };

        let merged = merge_config(defaults, "app_name = \"Cats\"\napi_level = 28\n").unwrap();
        assert_eq!(merged.app_name, "Cats");
        assert_eq!(merged.api_level, 28);
        assert_eq!(merged.external_root, PathBuf::from("/storage/emulated/0"));
    }

    #[test]
    fn test_merge_rejects_invalid_toml() {
        let result = merge_config(MediaStoreConfig::default(), "api_level = = 3");
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_config_file_location() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(config_path(dir.path()), dir.path().join("storage.toml"));
    }
}
