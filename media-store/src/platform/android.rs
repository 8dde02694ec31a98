//! Android platform functionality
//!
//! MediaStore, StatFs and runtime permission calls through JNI.

use crate::capability::{Permission, PermissionGate, SpaceProbe, VolumeStats};
use crate::error::MediaStoreError;
use crate::index::ContentIndex;
use crate::layout::DIRECTORY_PICTURES;
use crate::models::{ContentId, IndexRecord, MediaStoreConfig, NewIndexRecord, RecordLocation};
use jni::objects::{JObject, JObjectArray, JString, JValue};
use jni::{JNIEnv, JavaVM};
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::FromRawFd;
use std::path::{Path, PathBuf};

const PERMISSION_GRANTED: i32 = 0; // PackageManager.PERMISSION_GRANTED
const RUNTIME_PERMISSIONS_API_LEVEL: i32 = 23;
const MEDIA_MOUNTED: &str = "mounted";

const IMAGES_MEDIA_CLASS: &str = "android/provider/MediaStore$Images$Media";
const COLUMN_ID: &str = "_id";
const COLUMN_DISPLAY_NAME: &str = "_display_name";
const COLUMN_MIME_TYPE: &str = "mime_type";
const COLUMN_RELATIVE_PATH: &str = "relative_path";
const COLUMN_DATA: &str = "_data";
const COLUMN_SIZE: &str = "_size";
const COLUMN_DATE_ADDED: &str = "date_added";

/// Run JNI operations on the current thread, attaching it when needed
fn with_jni<F, T>(f: F) -> Result<T, MediaStoreError>
where
    F: FnOnce(&mut JNIEnv, &JObject) -> Result<T, jni::errors::Error>,
{
    let ctx = ndk_context::android_context();
    let vm = unsafe { JavaVM::from_raw(ctx.vm().cast()) }.map_err(platform_error)?;
    let mut env = vm.attach_current_thread().map_err(platform_error)?;
    let context = unsafe { JObject::from_raw(ctx.context().cast()) };

    match f(&mut env, &context) {
        Ok(result) => Ok(result),
        Err(e) => {
            if env.exception_check().unwrap_or(false) {
                let _ = env.exception_describe();
                let _ = env.exception_clear();
            }
            log::error!("JNI error: {e}");
            Err(platform_error(e))
        }
    }
}

fn platform_error(e: jni::errors::Error) -> MediaStoreError {
    MediaStoreError::Platform(e.to_string())
}

/// Build.VERSION.SDK_INT
fn sdk_int(env: &mut JNIEnv) -> jni::errors::Result<i32> {
    env.get_static_field("android/os/Build$VERSION", "SDK_INT", "I")?.i()
}

fn java_string<'local>(
    env: &mut JNIEnv<'local>,
    obj: JObject<'local>,
) -> jni::errors::Result<Option<String>> {
    if obj.is_null() {
        return Ok(None);
    }
    let string = JString::from(obj);
    let value: String = env.get_string(&string)?.into();
    Ok(Some(value))
}

fn file_path<'local>(
    env: &mut JNIEnv<'local>,
    file: JObject<'local>,
) -> jni::errors::Result<Option<PathBuf>> {
    if file.is_null() {
        return Ok(None);
    }
    let path = env
        .call_method(&file, "getAbsolutePath", "()Ljava/lang/String;", &[])?
        .l()?;
    Ok(java_string(env, path)?.map(PathBuf::from))
}

fn string_array<'local>(
    env: &mut JNIEnv<'local>,
    values: &[&str],
) -> jni::errors::Result<JObjectArray<'local>> {
    let array = env.new_object_array(values.len() as i32, "java/lang/String", JObject::null())?;
    for (i, value) in values.iter().enumerate() {
        let element = env.new_string(value)?;
        env.set_object_array_element(&array, i as i32, element)?;
    }
    Ok(array)
}

fn external_storage_directory<'local>(
    env: &mut JNIEnv<'local>,
) -> jni::errors::Result<JObject<'local>> {
    env.call_static_method(
        "android/os/Environment",
        "getExternalStorageDirectory",
        "()Ljava/io/File;",
        &[],
    )?
    .l()
}

struct PlatformDirs {
    api_level: i32,
    private_pictures_dir: Option<PathBuf>,
    external_root: Option<PathBuf>,
    internal_root: Option<PathBuf>,
    package_name: Option<String>,
    app_name: Option<String>,
}

fn query_platform_dirs(env: &mut JNIEnv, context: &JObject) -> jni::errors::Result<PlatformDirs> {
    let api_level = sdk_int(env)?;

    let pictures = env.new_string(DIRECTORY_PICTURES)?;
    let external_files = env
        .call_method(
            context,
            "getExternalFilesDir",
            "(Ljava/lang/String;)Ljava/io/File;",
            &[JValue::Object(&pictures)],
        )?
        .l()?;
    let private_pictures_dir = file_path(env, external_files)?;

    let external = external_storage_directory(env)?;
    let external_root = file_path(env, external)?;

    let files_dir = env
        .call_method(context, "getFilesDir", "()Ljava/io/File;", &[])?
        .l()?;
    let internal_root = file_path(env, files_dir)?;

    let package = env
        .call_method(context, "getPackageName", "()Ljava/lang/String;", &[])?
        .l()?;
    let package_name = java_string(env, package)?;

    let info = env
        .call_method(
            context,
            "getApplicationInfo",
            "()Landroid/content/pm/ApplicationInfo;",
            &[],
        )?
        .l()?;
    let package_manager = env
        .call_method(
            context,
            "getPackageManager",
            "()Landroid/content/pm/PackageManager;",
            &[],
        )?
        .l()?;
    let label = env
        .call_method(
            &info,
            "loadLabel",
            "(Landroid/content/pm/PackageManager;)Ljava/lang/CharSequence;",
            &[JValue::Object(&package_manager)],
        )?
        .l()?;
    let label = env
        .call_method(&label, "toString", "()Ljava/lang/String;", &[])?
        .l()?;
    let app_name = java_string(env, label)?;

    Ok(PlatformDirs {
        api_level,
        private_pictures_dir,
        external_root,
        internal_root,
        package_name,
        app_name,
    })
}

pub(super) fn apply_platform_config(mut config: MediaStoreConfig) -> MediaStoreConfig {
    let dirs = match with_jni(query_platform_dirs) {
        Ok(dirs) => dirs,
        Err(e) => {
            log::warn!("Could not query platform directories: {}", e);
            return config;
        }
    };
    log::info!("Android SDK version: {}", dirs.api_level);

    config.api_level = dirs.api_level.max(0) as u32;
    if let Some(dir) = dirs.private_pictures_dir {
        config.private_pictures_dir = dir;
    }
    if let Some(dir) = dirs.external_root {
        config.external_root = dir;
    }
    if let Some(dir) = dirs.internal_root {
        config.index_path = dir.join("media_index.db");
        config.internal_root = dir;
    }
    if let Some(package) = dirs.package_name {
        config.provider_authority = format!("{}.fileprovider", package);
    }
    if let Some(name) = dirs.app_name.filter(|n| !n.is_empty()) {
        config.app_name = name;
    }
    config
}

pub(super) fn is_external_storage_mounted() -> bool {
    with_jni(|env, _| {
        let state = env
            .call_static_method(
                "android/os/Environment",
                "getExternalStorageState",
                "()Ljava/lang/String;",
                &[],
            )?
            .l()?;
        Ok(java_string(env, state)?.as_deref() == Some(MEDIA_MOUNTED))
    })
    .unwrap_or(false)
}

/// Space probe backed by `StatFs` and `Environment`
pub struct AndroidSpaceProbe;

impl SpaceProbe for AndroidSpaceProbe {
    fn external_volume(&self) -> io::Result<VolumeStats> {
        with_jni(|env, _| {
            let dir = external_storage_directory(env)?;
            let path = env
                .call_method(&dir, "getPath", "()Ljava/lang/String;", &[])?
                .l()?;
            let stat = env.new_object(
                "android/os/StatFs",
                "(Ljava/lang/String;)V",
                &[JValue::Object(&path)],
            )?;
            let block_size = env.call_method(&stat, "getBlockSizeLong", "()J", &[])?.j()?;
            let available = env
                .call_method(&stat, "getAvailableBlocksLong", "()J", &[])?
                .j()?;
            Ok(VolumeStats {
                block_size: block_size.max(0) as u64,
                available_blocks: available.max(0) as u64,
            })
        })
        .map_err(|e| io::Error::other(e.to_string()))
    }

    fn internal_free_bytes(&self) -> io::Result<u64> {
        with_jni(|env, _| {
            let data = env
                .call_static_method(
                    "android/os/Environment",
                    "getDataDirectory",
                    "()Ljava/io/File;",
                    &[],
                )?
                .l()?;
            let free = env.call_method(&data, "getFreeSpace", "()J", &[])?.j()?;
            Ok(free.max(0) as u64)
        })
        .map_err(|e| io::Error::other(e.to_string()))
    }
}

/// Runtime permissions of the hosting activity
///
/// Below API 23 permissions are granted at install time and always reported
/// as granted.
pub struct AndroidPermissionGate;

impl PermissionGate for AndroidPermissionGate {
    fn is_granted(&self, permission: Permission) -> bool {
        with_jni(|env, context| {
            if sdk_int(env)? < RUNTIME_PERMISSIONS_API_LEVEL {
                return Ok(true);
            }
            let name = env.new_string(permission.as_str())?;
            let result = env
                .call_method(
                    context,
                    "checkSelfPermission",
                    "(Ljava/lang/String;)I",
                    &[JValue::Object(&name)],
                )?
                .i()?;
            Ok(result == PERMISSION_GRANTED)
        })
        .unwrap_or(false)
    }

    fn request(&self, permissions: &[Permission], request_code: i32) {
        let names: Vec<&str> = permissions.iter().map(|p| p.as_str()).collect();
        let result = with_jni(|env, context| {
            if sdk_int(env)? < RUNTIME_PERMISSIONS_API_LEVEL {
                return Ok(());
            }
            let array = string_array(env, &names)?;
            env.call_method(
                context,
                "requestPermissions",
                "([Ljava/lang/String;I)V",
                &[JValue::Object(&array), JValue::Int(request_code)],
            )?;
            Ok(())
        });
        if let Err(e) = result {
            log::warn!("Permission request {} failed: {}", request_code, e);
        }
    }
}

fn content_resolver<'local>(
    env: &mut JNIEnv<'local>,
    context: &JObject,
) -> jni::errors::Result<JObject<'local>> {
    env.call_method(
        context,
        "getContentResolver",
        "()Landroid/content/ContentResolver;",
        &[],
    )?
    .l()
}

fn images_collection<'local>(env: &mut JNIEnv<'local>) -> jni::errors::Result<JObject<'local>> {
    env.get_static_field(IMAGES_MEDIA_CLASS, "EXTERNAL_CONTENT_URI", "Landroid/net/Uri;")?
        .l()
}

fn item_uri<'local>(
    env: &mut JNIEnv<'local>,
    id: ContentId,
) -> jni::errors::Result<JObject<'local>> {
    let collection = images_collection(env)?;
    env.call_static_method(
        "android/content/ContentUris",
        "withAppendedId",
        "(Landroid/net/Uri;J)Landroid/net/Uri;",
        &[JValue::Object(&collection), JValue::Long(id)],
    )?
    .l()
}

fn put_string(
    env: &mut JNIEnv,
    values: &JObject,
    key: &str,
    value: &str,
) -> jni::errors::Result<()> {
    let key = env.new_string(key)?;
    let value = env.new_string(value)?;
    env.call_method(
        values,
        "put",
        "(Ljava/lang/String;Ljava/lang/String;)V",
        &[JValue::Object(&key), JValue::Object(&value)],
    )?;
    Ok(())
}

/// ContentResolver.query with an optional single-argument selection
fn query<'local>(
    env: &mut JNIEnv<'local>,
    context: &JObject,
    uri: &JObject,
    projection: &[&str],
    selection: Option<(&str, &str)>,
    sort_order: Option<&str>,
) -> jni::errors::Result<JObject<'local>> {
    let resolver = content_resolver(env, context)?;
    let projection = string_array(env, projection)?;
    let (selection, args) = match selection {
        Some((clause, arg)) => (
            JObject::from(env.new_string(clause)?),
            JObject::from(string_array(env, &[arg])?),
        ),
        None => (JObject::null(), JObject::null()),
    };
    let sort_order = match sort_order {
        Some(order) => JObject::from(env.new_string(order)?),
        None => JObject::null(),
    };

    env.call_method(
        &resolver,
        "query",
        "(Landroid/net/Uri;[Ljava/lang/String;Ljava/lang/String;[Ljava/lang/String;Ljava/lang/String;)Landroid/database/Cursor;",
        &[
            JValue::Object(uri),
            JValue::Object(&projection),
            JValue::Object(&selection),
            JValue::Object(&args),
            JValue::Object(&sort_order),
        ],
    )?
    .l()
}

/// Run `f` over a cursor and close it; `None` when the query returned no cursor
fn with_cursor<'local, T, F>(
    env: &mut JNIEnv<'local>,
    cursor: JObject<'local>,
    f: F,
) -> jni::errors::Result<Option<T>>
where
    F: FnOnce(&mut JNIEnv<'local>, &JObject<'local>) -> jni::errors::Result<T>,
{
    if cursor.is_null() {
        return Ok(None);
    }
    let result = f(env, &cursor);
    if result.is_err() && env.exception_check()? {
        env.exception_describe()?;
        env.exception_clear()?;
    }
    env.call_method(&cursor, "close", "()V", &[])?;
    result.map(Some)
}

fn cursor_is_null(env: &mut JNIEnv, cursor: &JObject, column: i32) -> jni::errors::Result<bool> {
    env.call_method(cursor, "isNull", "(I)Z", &[JValue::Int(column)])?
        .z()
}

fn cursor_long(
    env: &mut JNIEnv,
    cursor: &JObject,
    column: i32,
) -> jni::errors::Result<Option<i64>> {
    if cursor_is_null(env, cursor, column)? {
        return Ok(None);
    }
    Ok(Some(
        env.call_method(cursor, "getLong", "(I)J", &[JValue::Int(column)])?
            .j()?,
    ))
}

fn cursor_string(
    env: &mut JNIEnv,
    cursor: &JObject,
    column: i32,
) -> jni::errors::Result<Option<String>> {
    let value = env
        .call_method(cursor, "getString", "(I)Ljava/lang/String;", &[JValue::Int(column)])?
        .l()?;
    java_string(env, value)
}

fn move_to_next(env: &mut JNIEnv, cursor: &JObject) -> jni::errors::Result<bool> {
    env.call_method(cursor, "moveToNext", "()Z", &[])?.z()
}

/// `date_added` is in seconds since the epoch
fn format_date_added(seconds: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(seconds, 0).map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// The platform MediaStore images collection
#[derive(Debug, Default)]
pub struct MediaStoreIndex;

impl MediaStoreIndex {
    pub fn new() -> Self {
        Self
    }

    /// Detach a raw descriptor for the row and take ownership of it
    fn open_descriptor(&self, id: ContentId, mode: &str) -> Result<File, MediaStoreError> {
        let fd = with_jni(|env, context| {
            let resolver = content_resolver(env, context)?;
            let uri = item_uri(env, id)?;
            let mode = env.new_string(mode)?;
            let pfd = env
                .call_method(
                    &resolver,
                    "openFileDescriptor",
                    "(Landroid/net/Uri;Ljava/lang/String;)Landroid/os/ParcelFileDescriptor;",
                    &[JValue::Object(&uri), JValue::Object(&mode)],
                )?
                .l()?;
            if pfd.is_null() {
                return Ok(None);
            }
            Ok(Some(env.call_method(&pfd, "detachFd", "()I", &[])?.i()?))
        })
        .map_err(|e| MediaStoreError::StreamAcquisition(e.to_string()))?;

        let fd = fd.ok_or_else(|| {
            MediaStoreError::StreamAcquisition(format!("Failed to open descriptor for {}", id))
        })?;
        // detachFd hands the descriptor over, nobody else closes it
        Ok(unsafe { File::from_raw_fd(fd) })
    }

    fn find_first(&self, column: &str, value: &str) -> Result<Option<ContentId>, MediaStoreError> {
        let selection = format!("{}=?", column);
        let found = with_jni(|env, context| {
            let collection = images_collection(env)?;
            let cursor = query(
                env,
                context,
                &collection,
                &[COLUMN_ID],
                Some((selection.as_str(), value)),
                None,
            )?;
            with_cursor(env, cursor, |env, cursor| {
                if env.call_method(cursor, "moveToFirst", "()Z", &[])?.z()? {
                    cursor_long(env, cursor, 0)
                } else {
                    Ok(None)
                }
            })
        })?;
        Ok(found.flatten())
    }
}

impl ContentIndex for MediaStoreIndex {
    fn insert(&self, record: &NewIndexRecord) -> Result<ContentId, MediaStoreError> {
        let id = with_jni(|env, context| {
            let values = env.new_object("android/content/ContentValues", "()V", &[])?;
            put_string(env, &values, COLUMN_DISPLAY_NAME, &record.display_name)?;
            put_string(env, &values, COLUMN_MIME_TYPE, &record.mime_type)?;
            match &record.location {
                RecordLocation::Relative(relative) => {
                    put_string(env, &values, COLUMN_RELATIVE_PATH, relative)?
                }
                RecordLocation::Absolute(path) => {
                    put_string(env, &values, COLUMN_DATA, &path.to_string_lossy())?
                }
            }

            let resolver = content_resolver(env, context)?;
            let collection = images_collection(env)?;
            let uri = env
                .call_method(
                    &resolver,
                    "insert",
                    "(Landroid/net/Uri;Landroid/content/ContentValues;)Landroid/net/Uri;",
                    &[JValue::Object(&collection), JValue::Object(&values)],
                )?
                .l()?;
            if uri.is_null() {
                return Ok(None);
            }
            let id = env
                .call_static_method(
                    "android/content/ContentUris",
                    "parseId",
                    "(Landroid/net/Uri;)J",
                    &[JValue::Object(&uri)],
                )?
                .j()?;
            Ok(Some(id))
        })
        .map_err(|e| {
            MediaStoreError::RecordCreation(format!("Failed to create new MediaStore record: {}", e))
        })?;

        id.ok_or_else(|| {
            MediaStoreError::RecordCreation("Failed to create new MediaStore record.".to_string())
        })
    }

    fn open_output(&self, id: ContentId) -> Result<Box<dyn Write + Send>, MediaStoreError> {
        Ok(Box::new(self.open_descriptor(id, "wt")?))
    }

    fn open_read_write(&self, id: ContentId) -> Result<File, MediaStoreError> {
        self.open_descriptor(id, "rw")
    }

    fn open_read(&self, id: ContentId) -> Result<File, MediaStoreError> {
        self.open_descriptor(id, "r")
    }

    fn count(&self, id: ContentId) -> Result<usize, MediaStoreError> {
        let count = with_jni(|env, context| {
            let uri = item_uri(env, id)?;
            let cursor = query(env, context, &uri, &[COLUMN_ID], None, None)?;
            with_cursor(env, cursor, |env, cursor| {
                env.call_method(cursor, "getCount", "()I", &[])?.i()
            })
        })?;
        Ok(count.unwrap_or(0).max(0) as usize)
    }

    fn find_by_relative_path(
        &self,
        relative_path: &str,
    ) -> Result<Option<ContentId>, MediaStoreError> {
        self.find_first(COLUMN_RELATIVE_PATH, relative_path)
    }

    fn find_by_absolute_path(&self, path: &Path) -> Result<Option<ContentId>, MediaStoreError> {
        self.find_first(COLUMN_DATA, &path.to_string_lossy())
    }

    fn list_by_relative_path(
        &self,
        relative_path: &str,
    ) -> Result<Vec<IndexRecord>, MediaStoreError> {
        let selection = format!("{}=?", COLUMN_RELATIVE_PATH);
        let sort_order = format!("{} DESC", COLUMN_DISPLAY_NAME);
        let rows = with_jni(|env, context| {
            let collection = images_collection(env)?;
            let cursor = query(
                env,
                context,
                &collection,
                &[
                    COLUMN_ID,
                    COLUMN_DISPLAY_NAME,
                    COLUMN_MIME_TYPE,
                    COLUMN_RELATIVE_PATH,
                    COLUMN_DATA,
                    COLUMN_SIZE,
                    COLUMN_DATE_ADDED,
                ],
                Some((selection.as_str(), relative_path)),
                Some(sort_order.as_str()),
            )?;
            with_cursor(env, cursor, |env, cursor| {
                let mut rows = Vec::new();
                while move_to_next(env, cursor)? {
                    let row = env.with_local_frame(16, |env| -> jni::errors::Result<IndexRecord> {
                        Ok(IndexRecord {
                            id: cursor_long(env, cursor, 0)?.unwrap_or_default(),
                            display_name: cursor_string(env, cursor, 1)?.unwrap_or_default(),
                            mime_type: cursor_string(env, cursor, 2)?.unwrap_or_default(),
                            relative_path: cursor_string(env, cursor, 3)?,
                            absolute_path: cursor_string(env, cursor, 4)?,
                            size: cursor_long(env, cursor, 5)?,
                            date_added: cursor_long(env, cursor, 6)?.and_then(format_date_added),
                        })
                    })?;
                    rows.push(row);
                }
                Ok(rows)
            })
        })?;

        let rows = rows.unwrap_or_default();
        log::debug!("query finish! {} row(s) in {}", rows.len(), relative_path);
        Ok(rows)
    }

    fn delete(&self, id: ContentId) -> Result<usize, MediaStoreError> {
        let deleted = with_jni(|env, context| {
            let resolver = content_resolver(env, context)?;
            let uri = item_uri(env, id)?;
            env.call_method(
                &resolver,
                "delete",
                "(Landroid/net/Uri;Ljava/lang/String;[Ljava/lang/String;)I",
                &[
                    JValue::Object(&uri),
                    JValue::Object(&JObject::null()),
                    JValue::Object(&JObject::null()),
                ],
            )?
            .i()
        })?;
        Ok(deleted.max(0) as usize)
    }
}
