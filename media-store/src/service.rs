use crate::backend::{select_backend, BackendKind, StorageBackend};
use crate::capability::{
    check_available_local_storage, check_permission, is_permission_granted, Permission,
    PermissionGate, SpaceProbe,
};
use crate::error::MediaStoreError;
use crate::exif;
use crate::index::ContentIndex;
use crate::layout::{PrivateLayout, PublicLayout};
use crate::models::{IndexRecord, Locator, MediaStoreConfig, SaveRequest, Visibility};
use crate::platform::open_platform_services;
use crate::task::TaskHandle;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Blocking implementation of all storage operations
///
/// Every operation is independent; nothing here is shared between calls except
/// the filesystem and the content index.
struct StorageCore {
    config: MediaStoreConfig,
    index: Arc<dyn ContentIndex>,
    backend: Arc<dyn StorageBackend>,
    private: PrivateLayout,
    space: Arc<dyn SpaceProbe>,
    permissions: Arc<dyn PermissionGate>,
}

impl StorageCore {
    fn ensure_space(&self) -> Result<(), MediaStoreError> {
        if check_available_local_storage(self.space.as_ref()) {
            Ok(())
        } else {
            Err(MediaStoreError::InsufficientSpace(
                "Storage is filled".to_string(),
            ))
        }
    }

    fn ensure_permissions(&self) -> Result<(), MediaStoreError> {
        let required = self.backend.required_permissions();
        if is_permission_granted(self.permissions.as_ref(), required) {
            return Ok(());
        }
        let names: Vec<&str> = required.iter().map(|p| p.as_str()).collect();
        Err(MediaStoreError::PermissionDenied(names.join(", ")))
    }

    fn save_private(
        &self,
        owner_id: &str,
        bytes: &[u8],
        file_name: &str,
    ) -> Result<Locator, MediaStoreError> {
        self.ensure_space()?;
        let path = self.private.photo_file(owner_id, file_name)?;

        let mut out = File::create(&path)?;
        out.write_all(bytes)
            .and_then(|_| out.flush())
            .map_err(MediaStoreError::StreamWrite)?;

        log::debug!("Saved private image {}", path.display());
        Ok(Locator::Private(path))
    }

    fn save_public(
        &self,
        folder: &str,
        bytes: &[u8],
        file_name: &str,
    ) -> Result<Locator, MediaStoreError> {
        log::info!("{} \n Start to save file... {}", folder, file_name);
        self.ensure_space()?;
        self.ensure_permissions()?;
        self.backend.save_public(folder, file_name, bytes)
    }

    fn save(&self, request: &SaveRequest) -> Result<Locator, MediaStoreError> {
        match request.visibility {
            Visibility::Private => {
                self.save_private(&request.owner_id, &request.bytes, &request.file_name)
            }
            Visibility::Public => {
                self.save_public(&request.folder, &request.bytes, &request.file_name)
            }
        }
    }

    /// Seekable read-write handle; index-backed images go through the index
    fn open_read_write(&self, locator: &Locator) -> Result<File, MediaStoreError> {
        match locator {
            Locator::Content(id) => self.index.open_read_write(*id),
            Locator::Path(path) | Locator::Private(path) => {
                Ok(OpenOptions::new().read(true).write(true).open(path)?)
            }
        }
    }

    /// Read-only handle, enough for images the app no longer owns
    fn open_read(&self, locator: &Locator) -> Result<File, MediaStoreError> {
        match locator {
            Locator::Content(id) => self.index.open_read(*id),
            Locator::Path(path) | Locator::Private(path) => Ok(File::open(path)?),
        }
    }

    fn tag(&self, locator: &Locator, text: &str) -> Result<String, MediaStoreError> {
        let mut file = self.open_read_write(locator)?;
        let stored = exif::set_tag(&mut file, text)?;
        log::debug!("Tag of {} is now {:?}", locator, stored);
        Ok(stored)
    }

    fn read_tag(&self, locator: &Locator) -> Result<String, MediaStoreError> {
        let mut file = self.open_read(locator)?;
        Ok(exif::get_tag(&mut file)?)
    }

    fn read(&self, locator: &Locator) -> Result<Vec<u8>, MediaStoreError> {
        let mut data = Vec::new();
        self.open_read(locator)?.read_to_end(&mut data)?;
        Ok(data)
    }

    fn exists(&self, locator: &Locator) -> Result<bool, MediaStoreError> {
        match locator {
            Locator::Content(id) => Ok(self.index.count(*id)? > 0),
            Locator::Path(path) | Locator::Private(path) => Ok(path.exists()),
        }
    }

    fn remove(&self, locator: &Locator) -> Result<(), MediaStoreError> {
        match locator {
            Locator::Content(id) => {
                let rows = self.index.delete(*id)?;
                log::debug!("Deleted {} index row(s) for {}", rows, id);
            }
            Locator::Path(path) => {
                if path.as_os_str().is_empty() {
                    return Ok(());
                }
                match self.index.find_by_absolute_path(path)? {
                    Some(id) => {
                        self.index.delete(id)?;
                    }
                    None => remove_file_if_present(path)?,
                }
            }
            Locator::Private(path) => remove_file_if_present(path)?,
        }
        Ok(())
    }
}

fn remove_file_if_present(path: &Path) -> Result<(), MediaStoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Media store service
///
/// Every storage operation is dispatched to the blocking worker pool and
/// returns a [`TaskHandle`]; await it for the result, drop it to discard the
/// result.
#[derive(Clone)]
pub struct MediaStoreService {
    core: Arc<StorageCore>,
}

impl MediaStoreService {
    /// Build the service; the storage backend is chosen here, once, from `config.api_level`
    pub fn new(
        config: MediaStoreConfig,
        index: Arc<dyn ContentIndex>,
        space: Arc<dyn SpaceProbe>,
        permissions: Arc<dyn PermissionGate>,
    ) -> Self {
        let layout = PublicLayout::new(&config.external_root, &config.app_name);
        let backend = select_backend(config.api_level, index.clone(), layout, &config.mime_type);
        let private = PrivateLayout::new(&config.private_pictures_dir);

        Self {
            core: Arc::new(StorageCore {
                config,
                index,
                backend,
                private,
                space,
                permissions,
            }),
        }
    }

    /// Build the service on the platform index, space probe and permission gate
    pub fn open(config: MediaStoreConfig) -> Result<Self, MediaStoreError> {
        let services = open_platform_services(&config)?;
        Ok(Self::new(
            config,
            services.index,
            services.space,
            services.permissions,
        ))
    }

    pub fn config(&self) -> &MediaStoreConfig {
        &self.core.config
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.core.backend.kind()
    }

    /// URI string for display and sharing
    pub fn locator_uri(&self, locator: &Locator) -> String {
        locator.to_uri(
            &self.core.config.provider_authority,
            &self.core.private.pictures_dir,
        )
    }

    /// True when all `permissions` are granted, otherwise requests the denied ones
    pub fn check_permission(&self, permissions: &[Permission], request_code: i32) -> bool {
        check_permission(self.core.permissions.as_ref(), permissions, request_code)
    }

    pub fn is_permission_granted(&self, permissions: &[Permission]) -> bool {
        is_permission_granted(self.core.permissions.as_ref(), permissions)
    }

    /// Whether the free space check currently passes
    pub fn has_available_space(&self) -> bool {
        check_available_local_storage(self.core.space.as_ref())
    }

    fn dispatch<T, F>(&self, op: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&StorageCore) -> Result<T, MediaStoreError> + Send + 'static,
    {
        let core = self.core.clone();
        TaskHandle::spawn_blocking(move || op(&core))
    }

    /// Save into the app sandbox under `<owner_id>/<file_name>`, overwriting
    pub fn save_private(
        &self,
        owner_id: &str,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> TaskHandle<Locator> {
        let owner_id = owner_id.to_string();
        let file_name = file_name.to_string();
        self.dispatch(move |core| core.save_private(&owner_id, &bytes, &file_name))
    }

    /// Save into the shared gallery under the app folder and `folder`
    pub fn save_public(
        &self,
        folder: &str,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> TaskHandle<Locator> {
        let folder = folder.to_string();
        let file_name = file_name.to_string();
        self.dispatch(move |core| core.save_public(&folder, &bytes, &file_name))
    }

    pub fn save(&self, request: SaveRequest) -> TaskHandle<Locator> {
        self.dispatch(move |core| core.save(&request))
    }

    /// Set the user comment tag, returns the value read back from the image
    pub fn tag(&self, locator: &Locator, text: &str) -> TaskHandle<String> {
        let locator = locator.clone();
        let text = text.to_string();
        self.dispatch(move |core| core.tag(&locator, &text))
    }

    pub fn read_tag(&self, locator: &Locator) -> TaskHandle<String> {
        let locator = locator.clone();
        self.dispatch(move |core| core.read_tag(&locator))
    }

    pub fn read(&self, locator: &Locator) -> TaskHandle<Vec<u8>> {
        let locator = locator.clone();
        self.dispatch(move |core| core.read(&locator))
    }

    pub fn exists(&self, locator: &Locator) -> TaskHandle<bool> {
        let locator = locator.clone();
        self.dispatch(move |core| core.exists(&locator))
    }

    pub fn resolve(&self, folder: &str, file_name: &str) -> TaskHandle<Option<Locator>> {
        let folder = folder.to_string();
        let file_name = file_name.to_string();
        self.dispatch(move |core| core.backend.resolve(&folder, &file_name))
    }

    /// Remove an image; a locator that points nowhere is not an error
    pub fn remove(&self, locator: &Locator) -> TaskHandle<()> {
        let locator = locator.clone();
        self.dispatch(move |core| core.remove(&locator))
    }

    pub fn list_app_photos(&self, folder: &str) -> TaskHandle<Vec<IndexRecord>> {
        let folder = folder.to_string();
        self.dispatch(move |core| core.backend.list_folder(&folder))
    }

    pub fn create_temp_image_file(&self) -> TaskHandle<PathBuf> {
        self.dispatch(|core| Ok(core.private.create_temp_photo_file()?))
    }

    /// Raw path of a public image, `None` on scoped storage
    pub fn file_path_locator(&self, folder: &str, file_name: &str) -> Option<Locator> {
        self.core.backend.file_path_locator(folder, file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{StaticPermissionGate, VolumeStats, STORAGE};
    use crate::exif::tests::sample_jpeg;
    use crate::exif::NO_DATA;
    use crate::index::SqliteContentIndex;
    use crate::models::{ContentId, NewIndexRecord};
    use std::io;

    struct FixedSpace(u64);

    impl SpaceProbe for FixedSpace {
        fn external_volume(&self) -> io::Result<VolumeStats> {
            Ok(VolumeStats {
                block_size: 1_048_576,
                available_blocks: self.0,
            })
        }

        fn internal_free_bytes(&self) -> io::Result<u64> {
            Ok(0)
        }
    }

    /// Index that refuses write access to existing rows
    struct ForeignRowsIndex(SqliteContentIndex);

    impl ContentIndex for ForeignRowsIndex {
        fn insert(&self, record: &NewIndexRecord) -> Result<ContentId, MediaStoreError> {
            self.0.insert(record)
        }
        fn open_output(&self, id: ContentId) -> Result<Box<dyn Write + Send>, MediaStoreError> {
            self.0.open_output(id)
        }
        fn open_read_write(&self, id: ContentId) -> Result<File, MediaStoreError> {
            Err(MediaStoreError::StreamAcquisition(format!("row {} not owned", id)))
        }
        fn open_read(&self, id: ContentId) -> Result<File, MediaStoreError> {
            self.0.open_read(id)
        }
        fn count(&self, id: ContentId) -> Result<usize, MediaStoreError> {
            self.0.count(id)
        }
        fn find_by_relative_path(&self, p: &str) -> Result<Option<ContentId>, MediaStoreError> {
            self.0.find_by_relative_path(p)
        }
        fn find_by_absolute_path(&self, p: &Path) -> Result<Option<ContentId>, MediaStoreError> {
            self.0.find_by_absolute_path(p)
        }
        fn list_by_relative_path(&self, p: &str) -> Result<Vec<IndexRecord>, MediaStoreError> {
            self.0.list_by_relative_path(p)
        }
        fn delete(&self, id: ContentId) -> Result<usize, MediaStoreError> {
            self.0.delete(id)
        }
    }

    fn config(root: &Path, api_level: u32) -> MediaStoreConfig {
        MediaStoreConfig {
            app_name: "App".to_string(),
            private_pictures_dir: root.join("files/Pictures"),
            external_root: root.join("external"),
            internal_root: root.to_path_buf(),
            index_path: root.join("index.db"),
            api_level,
            ..MediaStoreConfig::default()
        }
    }

    fn service_with(
        root: &Path,
        api_level: u32,
        free_mb: u64,
        gate: StaticPermissionGate,
    ) -> MediaStoreService {
        let config = config(root, api_level);
        let index =
            Arc::new(SqliteContentIndex::open(&config.index_path, &config.external_root).unwrap());
        MediaStoreService::new(config, index, Arc::new(FixedSpace(free_mb)), Arc::new(gate))
    }

    fn service(root: &Path, api_level: u32) -> MediaStoreService {
        service_with(root, api_level, 1024, StaticPermissionGate::granting(STORAGE))
    }

    #[tokio::test]
    async fn test_private_save_reads_back_same_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 29);
        let bytes: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

        let locator = service.save_private("hello", bytes.clone(), "private.jpg").await.unwrap();
        assert_eq!(
            locator,
            Locator::Private(dir.path().join("files/Pictures/hello/private.jpg"))
        );
        assert_eq!(service.read(&locator).await.unwrap(), bytes);

        // Overwritten without complaint
        service.save_private("hello", vec![1, 2, 3], "private.jpg").await.unwrap();
        assert_eq!(service.read(&locator).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_full_storage_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), 29, 32, StaticPermissionGate::granting(STORAGE));

        let result = service.save_private("hello", vec![1], "private.jpg").await;
        assert!(matches!(result, Err(MediaStoreError::InsufficientSpace(_))));
        let result = service.save_public("cat", vec![1], "public.jpg").await;
        assert!(matches!(result, Err(MediaStoreError::InsufficientSpace(_))));
        assert!(!dir.path().join("files/Pictures/hello/private.jpg").exists());
    }

    #[tokio::test]
    async fn test_legacy_public_save_needs_disk_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), 28, 1024, StaticPermissionGate::default());
        let result = service.save_public("cat", vec![1], "public.jpg").await;
        assert!(matches!(result, Err(MediaStoreError::PermissionDenied(_))));

        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), 29, 1024, StaticPermissionGate::default());
        assert!(service.save_public("cat", vec![1], "public.jpg").await.is_ok());
    }

    #[tokio::test]
    async fn test_save_request_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 29);

        let private = service
            .save(SaveRequest::private("owner", "a.jpg", vec![1]))
            .await
            .unwrap();
        let public = service
            .save(SaveRequest::public("cat", "b.jpg", vec![2]))
            .await
            .unwrap();
        assert!(matches!(private, Locator::Private(_)));
        assert!(public.is_indexed());
    }

    #[tokio::test]
    async fn test_public_save_then_tag() {
        for api_level in [28, 29] {
            let dir = tempfile::tempdir().unwrap();
            let service = service(dir.path(), api_level);

            let locator = service.save_public("cat", sample_jpeg(), "public.jpg").await.unwrap();
            assert!(service.exists(&locator).await.unwrap());
            assert_eq!(service.tag(&locator, "HelloCat").await.unwrap(), "HelloCat");
            assert_eq!(service.read_tag(&locator).await.unwrap(), "HelloCat");
        }
    }

    #[tokio::test]
    async fn test_tag_without_metadata_block() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 29);
        let locator = service
            .save_private("hello", b"not a jpeg".to_vec(), "note.jpg")
            .await
            .unwrap();
        assert_eq!(service.tag(&locator, "T").await.unwrap(), NO_DATA);
    }

    #[tokio::test]
    async fn test_remove_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 28);

        service.remove(&Locator::Content(12345)).await.unwrap();
        service
            .remove(&Locator::Path(dir.path().join("nothing/here.jpg")))
            .await
            .unwrap();
        service
            .remove(&Locator::Private(dir.path().join("gone.jpg")))
            .await
            .unwrap();
        service.remove(&Locator::Path(PathBuf::new())).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_by_raw_path_deletes_row_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 28);

        let saved = service.save_public("cat", vec![9], "public.jpg").await.unwrap();
        let path_locator = service.file_path_locator("cat", "public.jpg").unwrap();
        assert!(service.exists(&path_locator).await.unwrap());

        service.remove(&path_locator).await.unwrap();
        assert!(!service.exists(&saved).await.unwrap());
        assert!(!service.exists(&path_locator).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_unindexed_file() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 28);
        let path = dir.path().join("external/Pictures/App/cat/stray.jpg");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"stray").unwrap();

        service.remove(&Locator::Path(path.clone())).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_resolve_then_remove_content() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 29);

        assert_eq!(service.resolve("cat", "public.jpg").await.unwrap(), None);
        let saved = service.save_public("cat", vec![1], "public.jpg").await.unwrap();
        let resolved = service.resolve("cat", "public.jpg").await.unwrap().unwrap();
        assert_eq!(resolved, saved);

        service.remove(&resolved).await.unwrap();
        assert!(!service.exists(&saved).await.unwrap());
        assert!(service.list_app_photos("cat").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_temp_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 29);
        let path = service.create_temp_image_file().await.unwrap();
        assert!(path.starts_with(dir.path().join("files/Pictures")));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_check_permission_requests_missing() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), 28, 1024, StaticPermissionGate::default());
        assert!(!service.is_permission_granted(STORAGE));
        assert!(!service.check_permission(STORAGE, 1001));
        assert!(service.has_available_space());
    }

    #[tokio::test]
    async fn test_reads_do_not_need_write_access() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), 29);
        let index = SqliteContentIndex::open(&config.index_path, &config.external_root).unwrap();
        let service = MediaStoreService::new(
            config,
            Arc::new(ForeignRowsIndex(index)),
            Arc::new(FixedSpace(1024)),
            Arc::new(StaticPermissionGate::granting(STORAGE)),
        );

        let locator = service.save_public("cat", sample_jpeg(), "public.jpg").await.unwrap();
        assert_eq!(service.read(&locator).await.unwrap(), sample_jpeg());
        assert_eq!(service.read_tag(&locator).await.unwrap(), NO_DATA);
        assert!(matches!(
            service.tag(&locator, "T").await,
            Err(MediaStoreError::StreamAcquisition(_))
        ));
    }

    #[tokio::test]
    async fn test_private_uris_keep_owner_folder() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 29);

        let hello = service.save_private("hello", vec![1], "private.jpg").await.unwrap();
        let other = service.save_private("other", vec![1], "private.jpg").await.unwrap();
        let authority = &service.config().provider_authority;
        assert_eq!(
            service.locator_uri(&hello),
            format!("content://{}/hello/private.jpg", authority)
        );
        assert_ne!(service.locator_uri(&hello), service.locator_uri(&other));
    }
}
