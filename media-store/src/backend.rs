use crate::capability::Permission;
use crate::commit::write_new_record;
use crate::error::MediaStoreError;
use crate::index::ContentIndex;
use crate::layout::PublicLayout;
use crate::models::{
    IndexRecord, Locator, NewIndexRecord, RecordLocation, SCOPED_STORAGE_API_LEVEL,
};
use std::sync::Arc;

/// Which public storage model a backend implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Absolute paths, explicit disk permissions (API < 29)
    Legacy,
    /// Relative paths behind the content index (API >= 29)
    Scoped,
}

impl BackendKind {
    pub fn for_api_level(api_level: u32) -> Self {
        if api_level >= SCOPED_STORAGE_API_LEVEL {
            BackendKind::Scoped
        } else {
            BackendKind::Legacy
        }
    }
}

/// Public gallery storage, one implementation per platform storage model
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Permissions a public write needs on this backend
    fn required_permissions(&self) -> &'static [Permission];

    /// Register and write an image in the public app folder
    fn save_public(
        &self,
        folder: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<Locator, MediaStoreError>;

    /// Look up a previously saved public image
    fn resolve(&self, folder: &str, file_name: &str) -> Result<Option<Locator>, MediaStoreError>;

    /// Raw path locator, only available where raw paths are usable
    fn file_path_locator(&self, folder: &str, file_name: &str) -> Option<Locator>;

    /// Index rows in the public app folder
    fn list_folder(&self, folder: &str) -> Result<Vec<IndexRecord>, MediaStoreError>;
}

/// Pick the backend once from the platform version
pub fn select_backend(
    api_level: u32,
    index: Arc<dyn ContentIndex>,
    layout: PublicLayout,
    mime_type: &str,
) -> Arc<dyn StorageBackend> {
    let kind = BackendKind::for_api_level(api_level);
    log::info!("API level {} -> {:?} storage backend", api_level, kind);
    match kind {
        BackendKind::Legacy => Arc::new(LegacyBackend::new(index, layout, mime_type)),
        BackendKind::Scoped => Arc::new(ScopedBackend::new(index, layout, mime_type)),
    }
}

const LEGACY_PERMISSIONS: &[Permission] = &[
    Permission::ReadExternalStorage,
    Permission::WriteExternalStorage,
];

/// Pre-scoped-storage backend: absolute paths in the `_data` column
///
/// A second save to the same path returns the row that is already there and
/// does not rewrite the bytes. The lookup and the insert are not atomic.
pub struct LegacyBackend {
    index: Arc<dyn ContentIndex>,
    layout: PublicLayout,
    mime_type: String,
}

impl LegacyBackend {
    pub fn new(index: Arc<dyn ContentIndex>, layout: PublicLayout, mime_type: &str) -> Self {
        Self {
            index,
            layout,
            mime_type: mime_type.to_string(),
        }
    }
}

impl StorageBackend for LegacyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Legacy
    }

    fn required_permissions(&self) -> &'static [Permission] {
        LEGACY_PERMISSIONS
    }

    fn save_public(
        &self,
        folder: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<Locator, MediaStoreError> {
        let absolute_path = self.layout.absolute_path(folder, file_name)?;

        if let Some(id) = self.index.find_by_absolute_path(&absolute_path)? {
            log::info!("{} already registered as {}", absolute_path.display(), id);
            return Ok(Locator::Content(id));
        }

        let record = NewIndexRecord {
            display_name: file_name.to_string(),
            mime_type: self.mime_type.clone(),
            location: RecordLocation::Absolute(absolute_path),
        };
        let id = write_new_record(self.index.as_ref(), &record, bytes)?;
        Ok(Locator::Content(id))
    }

    fn resolve(&self, folder: &str, file_name: &str) -> Result<Option<Locator>, MediaStoreError> {
        let absolute_path = self.layout.absolute_dir(folder).join(file_name);
        match self.index.find_by_absolute_path(&absolute_path)? {
            Some(id) => Ok(Some(Locator::Content(id))),
            // Not confirmed on disk, callers check `exists` before use
            None => Ok(Some(Locator::Path(absolute_path))),
        }
    }

    fn file_path_locator(&self, folder: &str, file_name: &str) -> Option<Locator> {
        Some(Locator::Path(self.layout.absolute_dir(folder).join(file_name)))
    }

    fn list_folder(&self, folder: &str) -> Result<Vec<IndexRecord>, MediaStoreError> {
        let root = self.layout.absolute_dir(folder);
        if root.is_dir() {
            for entry in std::fs::read_dir(&root)?.filter_map(|e| e.ok()) {
                if entry.path().is_dir() {
                    log::info!("{}", entry.path().display());
                }
            }
        }

        let records = self
            .index
            .list_by_relative_path(&self.layout.relative_dir(folder))?;
        if !records.is_empty() {
            return Ok(records);
        }

        // Legacy rows carry no relative path, match on their directory instead
        let mut records = Vec::new();
        if root.is_dir() {
            for entry in std::fs::read_dir(&root)?.filter_map(|e| e.ok()) {
                let path = entry.path();
                if let Some(id) = self.index.find_by_absolute_path(&path)? {
                    records.push(IndexRecord {
                        id,
                        display_name: entry.file_name().to_string_lossy().to_string(),
                        mime_type: self.mime_type.clone(),
                        relative_path: None,
                        absolute_path: Some(path.to_string_lossy().to_string()),
                        size: entry.metadata().ok().map(|m| m.len() as i64),
                        date_added: None,
                    });
                }
            }
        }
        records.sort_by(|a, b| b.display_name.cmp(&a.display_name));
        Ok(records)
    }
}

/// Scoped-storage backend: relative paths, every save registers a new row
pub struct ScopedBackend {
    index: Arc<dyn ContentIndex>,
    layout: PublicLayout,
    mime_type: String,
}

impl ScopedBackend {
    pub fn new(index: Arc<dyn ContentIndex>, layout: PublicLayout, mime_type: &str) -> Self {
        Self {
            index,
            layout,
            mime_type: mime_type.to_string(),
        }
    }
}

impl StorageBackend for ScopedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Scoped
    }

    fn required_permissions(&self) -> &'static [Permission] {
        &[]
    }

    fn save_public(
        &self,
        folder: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<Locator, MediaStoreError> {
        let record = NewIndexRecord {
            display_name: file_name.to_string(),
            mime_type: self.mime_type.clone(),
            location: RecordLocation::Relative(self.layout.relative_dir(folder)),
        };
        let id = write_new_record(self.index.as_ref(), &record, bytes)?;
        Ok(Locator::Content(id))
    }

    /// First row of the folder; the file name does not narrow the match
    fn resolve(&self, folder: &str, _file_name: &str) -> Result<Option<Locator>, MediaStoreError> {
        Ok(self
            .index
            .find_by_relative_path(&self.layout.relative_dir(folder))?
            .map(Locator::Content))
    }

    fn file_path_locator(&self, _folder: &str, _file_name: &str) -> Option<Locator> {
        None
    }

    fn list_folder(&self, folder: &str) -> Result<Vec<IndexRecord>, MediaStoreError> {
        let records = self
            .index
            .list_by_relative_path(&self.layout.relative_dir(folder))?;
        log::info!("query finish!");
        for record in &records {
            log::info!(
                "{} {}",
                record.display_name,
                record.relative_path.as_deref().unwrap_or_default()
            );
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::tests::BrokenStreamIndex;
    use crate::index::SqliteContentIndex;

    fn backend(
        api_level: u32,
        root: &std::path::Path,
    ) -> (Arc<dyn StorageBackend>, Arc<SqliteContentIndex>) {
        let index = Arc::new(SqliteContentIndex::open_in_memory(root).unwrap());
        let layout = PublicLayout::new(root, "App");
        (select_backend(api_level, index.clone(), layout, "image/*"), index)
    }

    #[test]
    fn test_api_level_selects_backend() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(backend(28, dir.path()).0.kind(), BackendKind::Legacy);
        assert_eq!(backend(29, dir.path()).0.kind(), BackendKind::Scoped);
        assert_eq!(backend(34, dir.path()).0.kind(), BackendKind::Scoped);
    }

    #[test]
    fn test_scoped_saves_never_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, index) = backend(29, dir.path());

        let first = backend.save_public("cat", "public.jpg", b"one").unwrap();
        let second = backend.save_public("cat", "public.jpg", b"two").unwrap();
        assert_ne!(first, second);
        assert_eq!(index.list_by_relative_path("Pictures/App/cat/").unwrap().len(), 2);

        // Each row keeps its own bytes
        let cat = dir.path().join("Pictures/App/cat");
        assert_eq!(std::fs::read(cat.join("public.jpg")).unwrap(), b"one");
        assert_eq!(std::fs::read(cat.join("public (1).jpg")).unwrap(), b"two");
    }

    #[test]
    fn test_scoped_failed_resave_keeps_first_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(BrokenStreamIndex {
            inner: SqliteContentIndex::open_in_memory(dir.path()).unwrap(),
            budget: 4,
        });
        let layout = PublicLayout::new(dir.path(), "App");
        let record = NewIndexRecord {
            display_name: "public.jpg".to_string(),
            mime_type: "image/*".to_string(),
            location: RecordLocation::Relative(layout.relative_dir("cat")),
        };
        let first = write_new_record(&index.inner, &record, b"ORIGINAL-BYTES").unwrap();

        let backend = ScopedBackend::new(index.clone(), layout, "image/*");
        let result = backend.save_public("cat", "public.jpg", b"NEWBYTES");
        assert!(matches!(result, Err(MediaStoreError::StreamWrite(_))));

        assert_eq!(index.count(first).unwrap(), 1);
        assert_eq!(index.list_by_relative_path("Pictures/App/cat/").unwrap().len(), 1);
        let mut stored = Vec::new();
        std::io::Read::read_to_end(&mut index.open_read(first).unwrap(), &mut stored).unwrap();
        assert_eq!(stored, b"ORIGINAL-BYTES");
        assert!(!dir.path().join("Pictures/App/cat/public (1).jpg").exists());
    }

    #[test]
    fn test_legacy_second_save_returns_existing() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, _index) = backend(28, dir.path());

        let first = backend.save_public("cat", "public.jpg", b"one").unwrap();
        let second = backend.save_public("cat", "public.jpg", b"two").unwrap();
        assert_eq!(first, second);

        let file = dir.path().join("Pictures/App/cat/public.jpg");
        assert_eq!(std::fs::read(file).unwrap(), b"one");
    }

    #[test]
    fn test_scoped_failed_write_leaves_no_row() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(BrokenStreamIndex::new(
            SqliteContentIndex::open_in_memory(dir.path()).unwrap(),
        ));
        let layout = PublicLayout::new(dir.path(), "App");
        let backend = ScopedBackend::new(index.clone(), layout, "image/*");

        let result = backend.save_public("cat", "public.jpg", b"bytes");
        assert!(matches!(result, Err(MediaStoreError::StreamWrite(_))));
        let rows = index.list_by_relative_path("Pictures/App/cat/").unwrap();
        assert!(rows.iter().all(|r| r.display_name != "public.jpg"));
        assert!(rows.is_empty());
    }

    #[test]
    fn test_legacy_failed_write_leaves_no_row() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(BrokenStreamIndex::new(
            SqliteContentIndex::open_in_memory(dir.path()).unwrap(),
        ));
        let layout = PublicLayout::new(dir.path(), "App");
        let backend = LegacyBackend::new(index.clone(), layout, "image/*");

        assert!(backend.save_public("cat", "public.jpg", b"bytes").is_err());
        let path = dir.path().join("Pictures/App/cat/public.jpg");
        assert_eq!(index.find_by_absolute_path(&path).unwrap(), None);
    }

    #[test]
    fn test_scoped_resolve_matches_folder_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, _index) = backend(29, dir.path());

        assert_eq!(backend.resolve("cat", "public.jpg").unwrap(), None);
        backend.save_public("catalog", "x.jpg", b"x").unwrap();
        assert_eq!(backend.resolve("cat", "public.jpg").unwrap(), None);

        let saved = backend.save_public("cat", "public.jpg", b"x").unwrap();
        assert_eq!(backend.resolve("cat", "public.jpg").unwrap(), Some(saved));
        assert_eq!(backend.file_path_locator("cat", "public.jpg"), None);
    }

    #[test]
    fn test_legacy_resolve_falls_back_to_path() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, _index) = backend(28, dir.path());
        let path = dir.path().join("Pictures/App/cat/public.jpg");

        assert_eq!(
            backend.resolve("cat", "public.jpg").unwrap(),
            Some(Locator::Path(path.clone()))
        );

        let saved = backend.save_public("cat", "public.jpg", b"x").unwrap();
        assert_eq!(backend.resolve("cat", "public.jpg").unwrap(), Some(saved));
        assert_eq!(
            backend.file_path_locator("cat", "public.jpg"),
            Some(Locator::Path(path))
        );
    }

    #[test]
    fn test_list_folder_on_both_backends() {
        for api_level in [28, 29] {
            let dir = tempfile::tempdir().unwrap();
            let (backend, _index) = backend(api_level, dir.path());
            backend.save_public("cat", "a.jpg", b"a").unwrap();
            backend.save_public("cat", "b.jpg", b"bb").unwrap();

            let names: Vec<String> = backend
                .list_folder("cat")
                .unwrap()
                .into_iter()
                .map(|r| r.display_name)
                .collect();
            assert_eq!(names, vec!["b.jpg", "a.jpg"], "api level {}", api_level);
        }
    }
}
