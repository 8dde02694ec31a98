use crate::error::MediaStoreError;
use crate::index::ContentIndex;
use crate::models::{ContentId, NewIndexRecord};
use std::io::Write;

/// An index row whose bytes are not written yet
///
/// Register → write → commit. A pending record that is dropped without
/// [`PendingRecord::commit`] deletes its row again, so the index never keeps a
/// row without bytes.
pub struct PendingRecord<'a> {
    index: &'a dyn ContentIndex,
    id: ContentId,
    committed: bool,
}

impl<'a> PendingRecord<'a> {
    /// Phase one: create the index row
    pub fn register(
        index: &'a dyn ContentIndex,
        record: &NewIndexRecord,
    ) -> Result<Self, MediaStoreError> {
        let id = index.insert(record)?;
        Ok(Self {
            index,
            id,
            committed: false,
        })
    }

    pub fn id(&self) -> ContentId {
        self.id
    }

    /// Phase two: stream the bytes into the row
    ///
    /// The stream is closed before this returns, on success and on error.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), MediaStoreError> {
        let mut stream = self.index.open_output(self.id)?;
        stream
            .write_all(bytes)
            .and_then(|_| stream.flush())
            .map_err(MediaStoreError::StreamWrite)
    }

    /// Keep the row
    pub fn commit(mut self) -> ContentId {
        self.committed = true;
        self.id
    }

    /// Delete the row now instead of on drop
    pub fn rollback(mut self) -> Result<(), MediaStoreError> {
        self.committed = true;
        self.index.delete(self.id).map(|_| ())
    }
}

impl Drop for PendingRecord<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        log::warn!("Rolling back index row {}", self.id);
        if let Err(e) = self.index.delete(self.id) {
            log::error!("Could not roll back index row {}: {}", self.id, e);
        }
    }
}

/// Register a row, write `bytes` and commit; any failure leaves no row behind
pub fn write_new_record(
    index: &dyn ContentIndex,
    record: &NewIndexRecord,
    bytes: &[u8],
) -> Result<ContentId, MediaStoreError> {
    let mut pending = PendingRecord::register(index, record)?;
    pending.write(bytes)?;
    Ok(pending.commit())
}
