use rusqlite::{Connection, Result};

/// Initialize the content index schema
pub fn init_index_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS media_schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT version FROM media_schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        create_index_schema_v1(conn)?;
        conn.execute("INSERT INTO media_schema_version (version) VALUES (1)", [])?;
    }

    Ok(())
}

/// Create content index schema version 1
///
/// Column names follow the platform media columns so queries read the same on
/// both index implementations.
fn create_index_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS images (
            _id INTEGER PRIMARY KEY AUTOINCREMENT,
            display_name TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            relative_path TEXT,
            _data TEXT NOT NULL,
            date_added TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_images_relative_path ON images(relative_path)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_images_data ON images(_data)",
        [],
    )?;

    Ok(())
}
