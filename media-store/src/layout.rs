use chrono::Local;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the shared pictures directory on the external volume
pub const DIRECTORY_PICTURES: &str = "Pictures";

/// Paths of the public, shared gallery folder of the app
#[derive(Debug, Clone)]
pub struct PublicLayout {
    pub external_root: PathBuf,
    pub app_name: String,
}

impl PublicLayout {
    pub fn new(external_root: &Path, app_name: &str) -> Self {
        Self {
            external_root: external_root.to_path_buf(),
            app_name: app_name.to_string(),
        }
    }

    fn segments<'a>(&'a self, folder: &'a str) -> Vec<&'a str> {
        let mut segments = vec![DIRECTORY_PICTURES, self.app_name.as_str()];
        if !folder.is_empty() {
            segments.push(folder);
        }
        segments
    }

    /// Relative path as stored by the scoped content index, e.g. `Pictures/App/cat/`
    ///
    /// The index normalizes relative paths to end with a slash, queries must match it.
    pub fn relative_dir(&self, folder: &str) -> String {
        format!("{}/", self.segments(folder).join("/"))
    }

    /// Absolute directory of the folder, without touching the filesystem
    pub fn absolute_dir(&self, folder: &str) -> PathBuf {
        self.segments(folder)
            .into_iter()
            .fold(self.external_root.clone(), |path, segment| path.join(segment))
    }

    /// Absolute directory of the folder, created when missing
    pub fn ensure_absolute_dir(&self, folder: &str) -> io::Result<PathBuf> {
        let dir = self.absolute_dir(folder);
        log::debug!("rootFolder : {}", dir.display());
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }

    pub fn absolute_path(&self, folder: &str, file_name: &str) -> io::Result<PathBuf> {
        Ok(self.ensure_absolute_dir(folder)?.join(file_name))
    }
}

/// Paths inside the app sandbox
#[derive(Debug, Clone)]
pub struct PrivateLayout {
    pub pictures_dir: PathBuf,
}

impl PrivateLayout {
    pub fn new(pictures_dir: &Path) -> Self {
        Self {
            pictures_dir: pictures_dir.to_path_buf(),
        }
    }

    /// `<pictures>/<owner_id>/<file_name>`, the owner folder is created when missing
    pub fn photo_file(&self, owner_id: &str, file_name: &str) -> io::Result<PathBuf> {
        let owner_dir = self.pictures_dir.join(owner_id);
        if !owner_dir.exists() {
            fs::create_dir_all(&owner_dir)?;
        }
        Ok(owner_dir.join(file_name))
    }

    /// Create an empty `yyyyMMdd_HHmmss_tmp*.jpg` file in the pictures directory
    pub fn create_temp_photo_file(&self) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.pictures_dir)?;
        let prefix = format!("{}_tmp", Local::now().format("%Y%m%d_%H%M%S"));

        for attempt in 0..1000u32 {
            let name = if attempt == 0 {
                format!("{}.jpg", prefix)
            } else {
                format!("{}{}.jpg", prefix, attempt)
            };
            let path = self.pictures_dir.join(name);
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(path),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "no free temporary file name",
        ))
    }
}
