use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// First API level with scoped storage (Android 10 / Q)
pub const SCOPED_STORAGE_API_LEVEL: u32 = 29;

/// Content URI of the shared image collection
pub const IMAGES_CONTENT_URI: &str = "content://media/external/images/media";

/// Identifier of a row in the content index
pub type ContentId = i64;

/// Where a save request should land
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    /// App sandbox, removed on uninstall
    Private,
    /// Shared gallery, registered in the content index
    Public,
}

/// A single save action coming from the UI
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub visibility: Visibility,
    /// Subfolder of the private sandbox
    pub owner_id: String,
    /// Subfolder of the public app folder (may be empty)
    pub folder: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl SaveRequest {
    pub fn private(owner_id: &str, file_name: &str, bytes: Vec<u8>) -> Self {
        Self {
            visibility: Visibility::Private,
            owner_id: owner_id.to_string(),
            folder: String::new(),
            file_name: file_name.to_string(),
            bytes,
        }
    }

    pub fn public(folder: &str, file_name: &str, bytes: Vec<u8>) -> Self {
        Self {
            visibility: Visibility::Public,
            owner_id: String::new(),
            folder: folder.to_string(),
            file_name: file_name.to_string(),
            bytes,
        }
    }
}

/// Resolved reference to a stored image
///
/// Index-backed locators and raw paths are not interchangeable: which one a
/// backend hands out depends on the platform version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// Row in the shared content index
    Content(ContentId),
    /// Direct filesystem path (legacy public storage)
    Path(PathBuf),
    /// File in the app sandbox, shared through the file provider
    Private(PathBuf),
}

impl Locator {
    pub fn is_indexed(&self) -> bool {
        matches!(self, Locator::Content(_))
    }

    pub fn content_id(&self) -> Option<ContentId> {
        match self {
            Locator::Content(id) => Some(*id),
            _ => None,
        }
    }

    /// URI string for this locator
    ///
    /// Sandbox files are shared as `content://<authority>/<path below private_root>`,
    /// so equal file names of different owners stay distinct.
    pub fn to_uri(&self, authority: &str, private_root: &Path) -> String {
        match self {
            Locator::Content(id) => format!("{}/{}", IMAGES_CONTENT_URI, id),
            Locator::Path(path) => path.display().to_string(),
            Locator::Private(path) => {
                let shared = path.strip_prefix(private_root).unwrap_or(path);
                let segments: Vec<String> = shared
                    .components()
                    .filter_map(|c| match c {
                        Component::Normal(part) => Some(part.to_string_lossy().to_string()),
                        _ => None,
                    })
                    .collect();
                format!("content://{}/{}", authority, segments.join("/"))
            }
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Content(id) => write!(f, "{}/{}", IMAGES_CONTENT_URI, id),
            Locator::Path(path) => write!(f, "{}", path.display()),
            Locator::Private(path) => write!(f, "private:{}", path.display()),
        }
    }
}

/// Location columns of a new index row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordLocation {
    /// `relative_path` column, e.g. `Pictures/App/cat/`
    Relative(String),
    /// `_data` column, absolute path on the external volume
    Absolute(PathBuf),
}

/// Values for inserting a row into the content index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIndexRecord {
    pub display_name: String,
    pub mime_type: String,
    pub location: RecordLocation,
}

/// A row of the content index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: ContentId,
    pub display_name: String,
    pub mime_type: String,
    pub relative_path: Option<String>,
    pub absolute_path: Option<String>,
    pub size: Option<i64>,
    pub date_added: Option<String>,
}

/// Configuration for the media store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaStoreConfig {
    /// Display name of the app, used as the public folder name
    pub app_name: String,
    /// App-specific pictures directory (private sandbox)
    pub private_pictures_dir: PathBuf,
    /// Root of the primary external volume
    pub external_root: PathBuf,
    /// Internal data directory, used for the free space check
    pub internal_root: PathBuf,
    /// SQLite file of the desktop content index
    pub index_path: PathBuf,
    /// File provider authority for sandbox locators
    pub provider_authority: String,
    pub mime_type: String,
    /// Platform API level, selects the storage backend
    pub api_level: u32,
}

impl Default for MediaStoreConfig {
    fn default() -> Self {
        Self {
            app_name: "StorageShowcase".to_string(),
            private_pictures_dir: PathBuf::from("./data/files/Pictures"),
            external_root: PathBuf::from("./data/external"),
            internal_root: PathBuf::from("./data"),
            index_path: PathBuf::from("./data/media_index.db"),
            provider_authority: "de.teilgedanken.storageshowcase.fileprovider".to_string(),
            mime_type: "image/*".to_string(),
            api_level: SCOPED_STORAGE_API_LEVEL,
        }
    }
}

impl MediaStoreConfig {
    pub fn is_scoped_storage(&self) -> bool {
        self.api_level >= SCOPED_STORAGE_API_LEVEL
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}
