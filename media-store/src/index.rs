use crate::error::MediaStoreError;
use crate::models::{ContentId, IndexRecord, NewIndexRecord, RecordLocation};
use crate::schema::init_index_schema;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// The shared content index: a registry of media rows, each owning a blob of bytes
///
/// Android implements this with the platform MediaStore, everything else with
/// [`SqliteContentIndex`].
pub trait ContentIndex: Send + Sync {
    /// Register a new row and return its id
    fn insert(&self, record: &NewIndexRecord) -> Result<ContentId, MediaStoreError>;

    /// Open a write stream over the row's bytes (truncating)
    fn open_output(&self, id: ContentId) -> Result<Box<dyn Write + Send>, MediaStoreError>;

    /// Open a seekable read-write handle over the row's bytes
    fn open_read_write(&self, id: ContentId) -> Result<File, MediaStoreError>;

    /// Open a read-only handle over the row's bytes
    fn open_read(&self, id: ContentId) -> Result<File, MediaStoreError>;

    /// Number of rows with this id (0 or 1)
    fn count(&self, id: ContentId) -> Result<usize, MediaStoreError>;

    /// First row whose relative path equals `relative_path`
    fn find_by_relative_path(&self, relative_path: &str)
        -> Result<Option<ContentId>, MediaStoreError>;

    /// First row whose absolute path equals `path`
    fn find_by_absolute_path(&self, path: &Path) -> Result<Option<ContentId>, MediaStoreError>;

    /// All rows in `relative_path`, display name descending
    fn list_by_relative_path(&self, relative_path: &str)
        -> Result<Vec<IndexRecord>, MediaStoreError>;

    /// Delete the row together with its bytes, returns the number of deleted rows
    fn delete(&self, id: ContentId) -> Result<usize, MediaStoreError>;
}

/// SQLite backed content index, storing bytes below `volume_root`
pub struct SqliteContentIndex {
    conn: Mutex<Connection>,
    volume_root: PathBuf,
}

impl SqliteContentIndex {
    /// Open (or create) the index database at `db_path`
    pub fn open(db_path: &Path, volume_root: &Path) -> Result<Self, MediaStoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn, volume_root)
    }

    pub fn open_in_memory(volume_root: &Path) -> Result<Self, MediaStoreError> {
        Self::with_connection(Connection::open_in_memory()?, volume_root)
    }

    fn with_connection(conn: Connection, volume_root: &Path) -> Result<Self, MediaStoreError> {
        init_index_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            volume_root: volume_root.to_path_buf(),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, MediaStoreError> {
        self.conn
            .lock()
            .map_err(|_| MediaStoreError::Other("Content index lock poisoned".to_string()))
    }

    fn data_path(&self, id: ContentId) -> Result<Option<PathBuf>, MediaStoreError> {
        let data: Option<String> = self
            .conn()?
            .query_row(
                "SELECT _data FROM images WHERE _id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data.map(PathBuf::from))
    }

    fn existing_data_path(&self, id: ContentId) -> Result<PathBuf, MediaStoreError> {
        self.data_path(id)?
            .ok_or_else(|| MediaStoreError::StreamAcquisition(format!("No index row {}", id)))
    }
}

fn data_in_use(conn: &Connection, path: &Path) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM images WHERE _data = ?1",
        params![path.to_string_lossy().to_string()],
        |row| row.get(0),
    )
}

/// Backing file for a new relative row: `dir/display_name`, or `name (1).ext`,
/// `name (2).ext`, ... when that file is already taken
fn unique_data_path(
    conn: &Connection,
    dir: &Path,
    display_name: &str,
) -> Result<PathBuf, MediaStoreError> {
    let name = Path::new(display_name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut candidate = dir.join(display_name);
    let mut attempt = 1;
    while candidate.exists() || data_in_use(conn, &candidate)? {
        candidate = dir.join(format!("{} ({}){}", stem, attempt, extension));
        attempt += 1;
    }
    Ok(candidate)
}

impl ContentIndex for SqliteContentIndex {
    fn insert(&self, record: &NewIndexRecord) -> Result<ContentId, MediaStoreError> {
        if record.display_name.is_empty() {
            return Err(MediaStoreError::RecordCreation(
                "Failed to create new MediaStore record: empty display name".to_string(),
            ));
        }
        let conn = self.conn()?;
        let (relative_path, data) = match &record.location {
            RecordLocation::Relative(relative) => (
                Some(relative.clone()),
                unique_data_path(&conn, &self.volume_root.join(relative), &record.display_name)?,
            ),
            RecordLocation::Absolute(path) => (None, path.clone()),
        };

        conn.execute(
            "INSERT INTO images (display_name, mime_type, relative_path, _data) VALUES (?1, ?2, ?3, ?4)",
            params![
                &record.display_name,
                &record.mime_type,
                relative_path,
                data.to_string_lossy().to_string(),
            ],
        )
        .map_err(|e| {
            MediaStoreError::RecordCreation(format!("Failed to create new MediaStore record: {}", e))
        })?;

        let id = conn.last_insert_rowid();
        log::debug!("Inserted index row {} -> {}", id, data.display());
        Ok(id)
    }

    fn open_output(&self, id: ContentId) -> Result<Box<dyn Write + Send>, MediaStoreError> {
        let path = self.existing_data_path(id)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MediaStoreError::StreamAcquisition(e.to_string()))?;
        }
        let file = File::create(&path)
            .map_err(|e| MediaStoreError::StreamAcquisition(format!("{}: {}", path.display(), e)))?;
        Ok(Box::new(file))
    }

    fn open_read_write(&self, id: ContentId) -> Result<File, MediaStoreError> {
        let path = self.existing_data_path(id)?;
        Ok(OpenOptions::new().read(true).write(true).open(path)?)
    }

    fn open_read(&self, id: ContentId) -> Result<File, MediaStoreError> {
        Ok(File::open(self.existing_data_path(id)?)?)
    }

    fn count(&self, id: ContentId) -> Result<usize, MediaStoreError> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM images WHERE _id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn find_by_relative_path(
        &self,
        relative_path: &str,
    ) -> Result<Option<ContentId>, MediaStoreError> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT _id FROM images WHERE relative_path = ?1 ORDER BY _id LIMIT 1",
                params![relative_path],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn find_by_absolute_path(&self, path: &Path) -> Result<Option<ContentId>, MediaStoreError> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT _id FROM images WHERE _data = ?1 ORDER BY _id LIMIT 1",
                params![path.to_string_lossy().to_string()],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn list_by_relative_path(
        &self,
        relative_path: &str,
    ) -> Result<Vec<IndexRecord>, MediaStoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT _id, display_name, mime_type, relative_path, _data, date_added
             FROM images
             WHERE relative_path = ?1
             ORDER BY display_name DESC",
        )?;

        let rows = stmt.query_map(params![relative_path], |row| {
            let data: String = row.get(4)?;
            let size = std::fs::metadata(&data).ok().map(|m| m.len() as i64);
            Ok(IndexRecord {
                id: row.get(0)?,
                display_name: row.get(1)?,
                mime_type: row.get(2)?,
                relative_path: row.get(3)?,
                absolute_path: Some(data),
                size,
                date_added: row.get(5)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn delete(&self, id: ContentId) -> Result<usize, MediaStoreError> {
        let Some(path) = self.data_path(id)? else {
            return Ok(0);
        };

        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM images WHERE _id = ?1", params![id])?;

        // Absolute rows registered twice for one path share their bytes
        let still_referenced = data_in_use(&conn, &path)?;

        if rows > 0 && !still_referenced {
            match std::fs::remove_file(&path) {
                Ok(()) => log::debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relative(name: &str) -> NewIndexRecord {
        NewIndexRecord {
            display_name: name.to_string(),
            mime_type: "image/*".to_string(),
            location: RecordLocation::Relative("Pictures/App/cat/".to_string()),
        }
    }

    #[test]
    fn test_insert_write_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteContentIndex::open_in_memory(dir.path()).unwrap();

        let id = index.insert(&relative("a.jpg")).unwrap();
        index.open_output(id).unwrap().write_all(b"abc").unwrap();

        let file = dir.path().join("Pictures/App/cat/a.jpg");
        assert_eq!(std::fs::read(&file).unwrap(), b"abc");
        assert_eq!(index.count(id).unwrap(), 1);
        assert_eq!(index.find_by_absolute_path(&file).unwrap(), Some(id));

        assert_eq!(index.delete(id).unwrap(), 1);
        assert_eq!(index.count(id).unwrap(), 0);
        assert!(!file.exists());
    }

    #[test]
    fn test_delete_missing_row_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteContentIndex::open_in_memory(dir.path()).unwrap();
        assert_eq!(index.delete(99).unwrap(), 0);
    }

    #[test]
    fn test_shared_bytes_survive_first_delete() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteContentIndex::open_in_memory(dir.path()).unwrap();
        let file = dir.path().join("Pictures/App/cat/a.jpg");
        let absolute = NewIndexRecord {
            display_name: "a.jpg".to_string(),
            mime_type: "image/*".to_string(),
            location: RecordLocation::Absolute(file.clone()),
        };

        let first = index.insert(&absolute).unwrap();
        let second = index.insert(&absolute).unwrap();
        index.open_output(second).unwrap().write_all(b"xyz").unwrap();

        index.delete(first).unwrap();
        assert!(file.exists());

        index.delete(second).unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn test_relative_rows_get_their_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteContentIndex::open_in_memory(dir.path()).unwrap();

        let first = index.insert(&relative("a.jpg")).unwrap();
        index.open_output(first).unwrap().write_all(b"first").unwrap();
        let second = index.insert(&relative("a.jpg")).unwrap();
        let third = index.insert(&relative("a.jpg")).unwrap();

        // Opening the second row's stream must not truncate the first row
        index.open_output(second).unwrap().write_all(b"2").unwrap();

        let cat = dir.path().join("Pictures/App/cat");
        assert_eq!(std::fs::read(cat.join("a.jpg")).unwrap(), b"first");
        assert_eq!(std::fs::read(cat.join("a (1).jpg")).unwrap(), b"2");
        assert_eq!(index.find_by_absolute_path(&cat.join("a (2).jpg")).unwrap(), Some(third));

        let names: Vec<String> = index
            .list_by_relative_path("Pictures/App/cat/")
            .unwrap()
            .into_iter()
            .map(|r| r.display_name)
            .collect();
        assert_eq!(names, vec!["a.jpg", "a.jpg", "a.jpg"]);
    }

    #[test]
    fn test_open_read_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteContentIndex::open_in_memory(dir.path()).unwrap();
        let id = index.insert(&relative("a.jpg")).unwrap();
        index.open_output(id).unwrap().write_all(b"abc").unwrap();

        let mut file = index.open_read(id).unwrap();
        let mut data = Vec::new();
        std::io::Read::read_to_end(&mut file, &mut data).unwrap();
        assert_eq!(data, b"abc");
        assert!(file.write_all(b"x").is_err());
        assert!(matches!(index.open_read(99), Err(MediaStoreError::StreamAcquisition(_))));
    }

    #[test]
    fn test_list_orders_by_display_name_desc() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteContentIndex::open_in_memory(dir.path()).unwrap();
        for name in ["b.jpg", "c.jpg", "a.jpg"] {
            index.insert(&relative(name)).unwrap();
        }

        let names: Vec<String> = index
            .list_by_relative_path("Pictures/App/cat/")
            .unwrap()
            .into_iter()
            .map(|r| r.display_name)
            .collect();
        assert_eq!(names, vec!["c.jpg", "b.jpg", "a.jpg"]);
    }

    #[test]
    fn test_empty_display_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteContentIndex::open_in_memory(dir.path()).unwrap();
        let result = index.insert(&relative(""));
        assert!(matches!(result, Err(MediaStoreError::RecordCreation(_))));
    }
}
