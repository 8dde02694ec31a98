//! EXIF UserComment editing for JPEG files.
//!
//! Only the APP1 `Exif` segment is rewritten. Existing IFD entries, the GPS
//! and interoperability directories and the IFD1 thumbnail are carried over;
//! offsets inside maker notes are not relocated.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Returned when an image has no metadata block to tag
pub const NO_DATA: &str = "No data";

pub const TAG_USER_COMMENT: u16 = 0x9286;
const TAG_EXIF_IFD: u16 = 0x8769;
const TAG_GPS_IFD: u16 = 0x8825;
const TAG_INTEROP_IFD: u16 = 0xA005;
const TAG_THUMBNAIL_OFFSET: u16 = 0x0201;
const TAG_THUMBNAIL_LENGTH: u16 = 0x0202;
const SUB_IFD_TAGS: [u16; 3] = [TAG_EXIF_IFD, TAG_GPS_IFD, TAG_INTEROP_IFD];

const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;
const TYPE_UNDEFINED: u16 = 7;

const EXIF_HEADER: &[u8] = b"Exif\0\0";
const MARKER_SOI: u8 = 0xD8;
const MARKER_APP1: u8 = 0xE1;
const MARKER_SOS: u8 = 0xDA;
const MARKER_EOI: u8 = 0xD9;
const MAX_SEGMENT_LEN: usize = 0xFFFF;

/// Error type for metadata operations
#[derive(Debug)]
pub enum ExifError {
    Malformed(String),
    /// The rewritten metadata does not fit into one JPEG segment
    TooLarge(usize),
    Io(io::Error),
}

impl std::fmt::Display for ExifError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExifError::Malformed(msg) => write!(f, "Malformed metadata: {}", msg),
            ExifError::TooLarge(len) => write!(f, "Metadata block too large: {} bytes", len),
            ExifError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for ExifError {}

impl From<io::Error> for ExifError {
    fn from(err: io::Error) -> Self {
        ExifError::Io(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn u16(self, b: &[u8]) -> u16 {
        match self {
            ByteOrder::Little => u16::from_le_bytes([b[0], b[1]]),
            ByteOrder::Big => u16::from_be_bytes([b[0], b[1]]),
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            ByteOrder::Big => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
        }
    }

    fn put_u16(self, v: u16) -> [u8; 2] {
        match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        }
    }

    fn put_u32(self, v: u32) -> [u8; 4] {
        match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        }
    }
}

fn type_size(kind: u16) -> Option<usize> {
    match kind {
        1 | 2 | 6 | 7 => Some(1),
        3 | 8 => Some(2),
        4 | 9 | 11 | 13 => Some(4),
        5 | 10 | 12 => Some(8),
        _ => None,
    }
}

/// One IFD entry, value bytes kept in file byte order
#[derive(Debug, Clone, PartialEq)]
struct Entry {
    tag: u16,
    kind: u16,
    count: u32,
    data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Ifd {
    entries: Vec<Entry>,
    children: Vec<(u16, Ifd)>,
}

impl Ifd {
    fn entry(&self, tag: u16) -> Option<&Entry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    fn child(&self, tag: u16) -> Option<&Ifd> {
        self.children.iter().find(|(t, _)| *t == tag).map(|(_, ifd)| ifd)
    }

    fn child_mut_or_insert(&mut self, tag: u16) -> &mut Ifd {
        let position = match self.children.iter().position(|(t, _)| *t == tag) {
            Some(position) => position,
            None => {
                self.children.push((tag, Ifd::default()));
                self.children.len() - 1
            }
        };
        &mut self.children[position].1
    }

    fn set(&mut self, entry: Entry) {
        self.entries.retain(|e| e.tag != entry.tag);
        self.entries.push(entry);
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Tiff {
    order: ByteOrder,
    ifd0: Ifd,
    ifd1: Option<Ifd>,
    thumbnail: Option<Vec<u8>>,
}

impl Tiff {
    fn empty() -> Self {
        Self {
            order: ByteOrder::Big,
            ifd0: Ifd::default(),
            ifd1: None,
            thumbnail: None,
        }
    }

    fn user_comment(&self) -> Option<String> {
        self.ifd0
            .child(TAG_EXIF_IFD)
            .and_then(|exif| exif.entry(TAG_USER_COMMENT))
            .map(|entry| decode_user_comment(&entry.data, self.order))
    }

    fn set_user_comment(&mut self, text: &str) {
        let data = encode_user_comment(text, self.order);
        self.ifd0.child_mut_or_insert(TAG_EXIF_IFD).set(Entry {
            tag: TAG_USER_COMMENT,
            kind: TYPE_UNDEFINED,
            count: data.len() as u32,
            data,
        });
    }
}

fn malformed(msg: &str) -> ExifError {
    ExifError::Malformed(msg.to_string())
}

fn parse_tiff(data: &[u8]) -> Result<Tiff, ExifError> {
    if data.len() < 8 {
        return Err(malformed("TIFF header truncated"));
    }
    let order = match &data[0..2] {
        b"II" => ByteOrder::Little,
        b"MM" => ByteOrder::Big,
        _ => return Err(malformed("unknown byte order")),
    };
    if order.u16(&data[2..4]) != 42 {
        return Err(malformed("bad TIFF magic"));
    }

    let mut visited = HashSet::new();
    let ifd0_offset = order.u32(&data[4..8]) as usize;
    let (ifd0, next) = parse_ifd(data, order, ifd0_offset, &mut visited, 0)?;

    let mut tiff = Tiff {
        order,
        ifd0,
        ifd1: None,
        thumbnail: None,
    };

    if next != 0 {
        match parse_ifd(data, order, next, &mut visited, 0) {
            Ok((ifd1, _)) => {
                tiff.thumbnail = extract_thumbnail(data, order, &ifd1);
                tiff.ifd1 = Some(ifd1);
            }
            Err(e) => log::warn!("Dropping unreadable IFD1: {}", e),
        }
    }

    Ok(tiff)
}

fn parse_ifd(
    data: &[u8],
    order: ByteOrder,
    offset: usize,
    visited: &mut HashSet<usize>,
    depth: usize,
) -> Result<(Ifd, usize), ExifError> {
    if depth > 4 || !visited.insert(offset) {
        return Err(malformed("IFD loop"));
    }
    let count = data
        .get(offset..offset + 2)
        .map(|b| order.u16(b) as usize)
        .ok_or_else(|| malformed("IFD offset out of range"))?;

    let mut ifd = Ifd::default();
    for i in 0..count {
        let at = offset + 2 + i * 12;
        let raw = data
            .get(at..at + 12)
            .ok_or_else(|| malformed("IFD entry out of range"))?;
        let tag = order.u16(&raw[0..2]);
        let kind = order.u16(&raw[2..4]);
        let value_count = order.u32(&raw[4..8]);

        let Some(len) = type_size(kind).and_then(|size| size.checked_mul(value_count as usize))
        else {
            log::debug!("Skipping entry {:#06x} of unknown type {}", tag, kind);
            continue;
        };

        let value = if len <= 4 {
            raw[8..8 + len].to_vec()
        } else {
            let value_offset = order.u32(&raw[8..12]) as usize;
            match value_offset
                .checked_add(len)
                .and_then(|end| data.get(value_offset..end))
            {
                Some(bytes) => bytes.to_vec(),
                None => {
                    log::debug!("Skipping entry {:#06x} with value out of range", tag);
                    continue;
                }
            }
        };

        if SUB_IFD_TAGS.contains(&tag) && len == 4 {
            let child_offset = order.u32(&value) as usize;
            match parse_ifd(data, order, child_offset, visited, depth + 1) {
                Ok((child, _)) => ifd.children.push((tag, child)),
                Err(e) => log::warn!("Skipping sub IFD {:#06x}: {}", tag, e),
            }
            continue;
        }

        ifd.entries.push(Entry {
            tag,
            kind,
            count: value_count,
            data: value,
        });
    }

    let next_at = offset + 2 + count * 12;
    let next = data
        .get(next_at..next_at + 4)
        .map(|b| order.u32(b) as usize)
        .unwrap_or(0);

    Ok((ifd, next))
}

fn entry_u32(entry: &Entry, order: ByteOrder) -> Option<u32> {
    match (entry.kind, entry.data.len()) {
        (TYPE_SHORT, 2) => Some(order.u16(&entry.data) as u32),
        (TYPE_LONG, 4) => Some(order.u32(&entry.data)),
        _ => None,
    }
}

fn extract_thumbnail(data: &[u8], order: ByteOrder, ifd1: &Ifd) -> Option<Vec<u8>> {
    let offset = entry_u32(ifd1.entry(TAG_THUMBNAIL_OFFSET)?, order)? as usize;
    let length = entry_u32(ifd1.entry(TAG_THUMBNAIL_LENGTH)?, order)? as usize;
    data.get(offset..offset.checked_add(length)?).map(|b| b.to_vec())
}

/// Positions written for one IFD
struct Written {
    offset: usize,
    next_pos: usize,
    value_positions: Vec<(u16, usize)>,
}

impl Written {
    fn value_pos(&self, tag: u16) -> Option<usize> {
        self.value_positions
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, pos)| *pos)
    }
}

#[derive(Clone, Copy)]
enum Slot<'a> {
    Value(&'a Entry),
    Child(&'a Ifd),
}

fn align(buf: &mut Vec<u8>) {
    if buf.len() % 2 == 1 {
        buf.push(0);
    }
}

fn patch_u32(buf: &mut [u8], order: ByteOrder, pos: usize, value: usize) {
    buf[pos..pos + 4].copy_from_slice(&order.put_u32(value as u32));
}

fn write_ifd(buf: &mut Vec<u8>, order: ByteOrder, ifd: &Ifd) -> Written {
    align(buf);
    let offset = buf.len();

    let mut slots: Vec<(u16, Slot)> = ifd
        .entries
        .iter()
        .map(|e| (e.tag, Slot::Value(e)))
        .chain(ifd.children.iter().map(|(tag, c)| (*tag, Slot::Child(c))))
        .collect();
    slots.sort_by_key(|(tag, _)| *tag);

    buf.extend_from_slice(&order.put_u16(slots.len() as u16));
    let mut value_positions = Vec::with_capacity(slots.len());
    let mut deferred = Vec::new();

    for (tag, slot) in slots.iter().copied() {
        let (kind, count) = match slot {
            Slot::Value(e) => (e.kind, e.count),
            Slot::Child(_) => (TYPE_LONG, 1),
        };
        buf.extend_from_slice(&order.put_u16(tag));
        buf.extend_from_slice(&order.put_u16(kind));
        buf.extend_from_slice(&order.put_u32(count));
        let value_pos = buf.len();
        buf.extend_from_slice(&[0u8; 4]);
        value_positions.push((tag, value_pos));

        match slot {
            Slot::Value(e) if e.data.len() <= 4 => {
                buf[value_pos..value_pos + e.data.len()].copy_from_slice(&e.data);
            }
            _ => deferred.push((value_pos, slot)),
        }
    }

    let next_pos = buf.len();
    buf.extend_from_slice(&[0u8; 4]);

    for (value_pos, slot) in deferred {
        match slot {
            Slot::Value(e) => {
                align(buf);
                let at = buf.len();
                buf.extend_from_slice(&e.data);
                patch_u32(buf, order, value_pos, at);
            }
            Slot::Child(child) => {
                let written = write_ifd(buf, order, child);
                patch_u32(buf, order, value_pos, written.offset);
            }
        }
    }

    Written {
        offset,
        next_pos,
        value_positions,
    }
}

fn write_tiff(tiff: &Tiff) -> Vec<u8> {
    let order = tiff.order;
    let mut buf = Vec::new();
    buf.extend_from_slice(match order {
        ByteOrder::Little => b"II",
        ByteOrder::Big => b"MM",
    });
    buf.extend_from_slice(&order.put_u16(42));
    buf.extend_from_slice(&order.put_u32(8));

    let ifd0 = write_ifd(&mut buf, order, &tiff.ifd0);

    if let Some(ifd1) = &tiff.ifd1 {
        let written = write_ifd(&mut buf, order, ifd1);
        patch_u32(&mut buf, order, ifd0.next_pos, written.offset);

        if let (Some(thumbnail), Some(pos)) =
            (&tiff.thumbnail, written.value_pos(TAG_THUMBNAIL_OFFSET))
        {
            let at = buf.len();
            buf.extend_from_slice(thumbnail);
            patch_u32(&mut buf, order, pos, at);
        }
    }

    buf
}

fn encode_user_comment(text: &str, order: ByteOrder) -> Vec<u8> {
    if text.is_ascii() {
        let mut data = b"ASCII\0\0\0".to_vec();
        data.extend_from_slice(text.as_bytes());
        data
    } else {
        let mut data = b"UNICODE\0".to_vec();
        for unit in text.encode_utf16() {
            data.extend_from_slice(&order.put_u16(unit));
        }
        data
    }
}

fn decode_user_comment(data: &[u8], order: ByteOrder) -> String {
    if data.len() < 8 {
        return String::from_utf8_lossy(data).trim_end_matches('\0').to_string();
    }
    let (prefix, body) = data.split_at(8);
    let text = if prefix == b"UNICODE\0" {
        let units: Vec<u16> = body.chunks_exact(2).map(|c| order.u16(c)).collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(body).into_owned()
    };
    text.trim_end_matches('\0').to_string()
}

fn is_jpeg(data: &[u8]) -> bool {
    data.len() >= 4 && data[0] == 0xFF && data[1] == MARKER_SOI && data[2] == 0xFF
}

/// Byte range of the APP1 Exif segment, marker included
fn find_exif_segment(data: &[u8]) -> Result<Option<(usize, usize)>, ExifError> {
    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            return Err(malformed("expected JPEG marker"));
        }
        // Fill bytes before a marker
        while pos + 1 < data.len() && data[pos + 1] == 0xFF {
            pos += 1;
        }
        let Some(&marker) = data.get(pos + 1) else {
            break;
        };
        if marker == MARKER_SOS || marker == MARKER_EOI {
            break;
        }
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }

        let len = data
            .get(pos + 2..pos + 4)
            .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
            .ok_or_else(|| malformed("segment length truncated"))?;
        if len < 2 {
            return Err(malformed("segment length too small"));
        }
        let end = pos + 2 + len;
        if end > data.len() {
            return Err(malformed("segment exceeds file"));
        }
        if marker == MARKER_APP1 && data[pos + 4..end].starts_with(EXIF_HEADER) {
            return Ok(Some((pos, end)));
        }
        pos = end;
    }
    Ok(None)
}

fn tiff_of_segment(data: &[u8], start: usize, end: usize) -> Result<Tiff, ExifError> {
    parse_tiff(&data[start + 4 + EXIF_HEADER.len()..end])
}

/// Exif segment range, `None` when the marker sequence cannot be walked
fn readable_exif_segment(data: &[u8]) -> Option<Option<(usize, usize)>> {
    match find_exif_segment(data) {
        Ok(segment) => Some(segment),
        Err(e) => {
            log::warn!("Unreadable JPEG segments: {}", e);
            None
        }
    }
}

/// User comment stored in a JPEG image
///
/// `None` when the image is not a JPEG, its metadata cannot be parsed or it
/// carries no user comment.
pub fn read_user_comment(data: &[u8]) -> Result<Option<String>, ExifError> {
    if !is_jpeg(data) {
        return Ok(None);
    }
    let Some(Some((start, end))) = readable_exif_segment(data) else {
        return Ok(None);
    };
    match tiff_of_segment(data, start, end) {
        Ok(tiff) => Ok(tiff.user_comment()),
        Err(e) => {
            log::warn!("Ignoring damaged Exif segment: {}", e);
            Ok(None)
        }
    }
}

/// Copy of the JPEG `data` with its user comment set to `text`
///
/// `None` when `data` is not a JPEG or its segments cannot be walked, so there
/// is no metadata block to write. A JPEG without an Exif segment gets a new one
/// right after the start-of-image marker; a damaged Exif segment is replaced by
/// a fresh one.
pub fn with_user_comment(data: &[u8], text: &str) -> Result<Option<Vec<u8>>, ExifError> {
    if !is_jpeg(data) {
        return Ok(None);
    }
    let Some(segment) = readable_exif_segment(data) else {
        return Ok(None);
    };

    let (start, end, mut tiff) = match segment {
        Some((start, end)) => match tiff_of_segment(data, start, end) {
            Ok(tiff) => (start, end, tiff),
            Err(e) => {
                log::warn!("Replacing damaged Exif segment: {}", e);
                (start, end, Tiff::empty())
            }
        },
        None => (2, 2, Tiff::empty()),
    };
    tiff.set_user_comment(text);

    let mut payload = EXIF_HEADER.to_vec();
    payload.extend_from_slice(&write_tiff(&tiff));
    let segment_len = payload.len() + 2;
    if segment_len > MAX_SEGMENT_LEN {
        return Err(ExifError::TooLarge(segment_len));
    }

    let mut out = Vec::with_capacity(data.len() + segment_len + 2);
    out.extend_from_slice(&data[..start]);
    out.extend_from_slice(&[0xFF, MARKER_APP1]);
    out.extend_from_slice(&(segment_len as u16).to_be_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&data[end..]);
    Ok(Some(out))
}

fn read_all(file: &mut File) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(0))?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    Ok(data)
}

/// Read the tag of an open image, [`NO_DATA`] when there is none
pub fn get_tag(file: &mut File) -> Result<String, ExifError> {
    let data = read_all(file)?;
    Ok(read_user_comment(&data)?.unwrap_or_else(|| NO_DATA.to_string()))
}

/// Set the tag on an open read-write image and return what is stored afterwards
pub fn set_tag(file: &mut File, text: &str) -> Result<String, ExifError> {
    let data = read_all(file)?;
    let Some(updated) = with_user_comment(&data, text)? else {
        return Ok(NO_DATA.to_string());
    };

    file.seek(SeekFrom::Start(0))?;
    file.write_all(&updated)?;
    file.set_len(updated.len() as u64)?;
    file.flush()?;

    get_tag(file)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Smallest marker sequence the segment scanner accepts as JPEG
    pub(crate) fn sample_jpeg() -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8];
        // APP0 JFIF
        data.extend_from_slice(&[
            0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0, 1, 1, 0, 0, 1, 0, 1, 0, 0,
        ]);
        // SOS + scan data + EOI
        data.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 1, 1, 0, 0, 0x3F, 0]);
        data.extend_from_slice(&[0x12, 0x34, 0x56, 0xFF, 0xD9]);
        data
    }

    fn jpeg_with_tiff(tiff: &[u8]) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE1];
        data.extend_from_slice(&((tiff.len() + 8) as u16).to_be_bytes());
        data.extend_from_slice(EXIF_HEADER);
        data.extend_from_slice(tiff);
        data.extend_from_slice(&sample_jpeg()[2..]);
        data
    }

    #[test]
    fn test_set_and_read_comment() {
        let updated = with_user_comment(&sample_jpeg(), "HelloCat").unwrap().unwrap();
        assert_eq!(read_user_comment(&updated).unwrap(), Some("HelloCat".to_string()));
        // Scan data is untouched
        assert!(updated.ends_with(&[0x12, 0x34, 0x56, 0xFF, 0xD9]));
    }

    #[test]
    fn test_set_twice_replaces_segment() {
        let once = with_user_comment(&sample_jpeg(), "first").unwrap().unwrap();
        let twice = with_user_comment(&once, "second").unwrap().unwrap();
        assert_eq!(read_user_comment(&twice).unwrap(), Some("second".to_string()));

        let app1_count = twice.windows(2).filter(|w| w[0] == 0xFF && w[1] == MARKER_APP1).count();
        assert_eq!(app1_count, 1);
    }

    #[test]
    fn test_unicode_comment() {
        let updated = with_user_comment(&sample_jpeg(), "Katze 🐱").unwrap().unwrap();
        assert_eq!(read_user_comment(&updated).unwrap(), Some("Katze 🐱".to_string()));
    }

    #[test]
    fn test_not_a_jpeg_has_no_metadata() {
        assert_eq!(with_user_comment(b"\x89PNG\r\n\x1a\n", "x").unwrap(), None);
        assert_eq!(read_user_comment(b"plain text").unwrap(), None);
    }

    #[test]
    fn test_existing_entries_survive() {
        // Little endian, IFD0 with Make (inline) and Model (offset)
        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"II");
        tiff.extend_from_slice(&42u16.to_le_bytes());
        tiff.extend_from_slice(&8u32.to_le_bytes());
        tiff.extend_from_slice(&2u16.to_le_bytes());
        // 0x010F Make, ASCII, 4 bytes inline
        tiff.extend_from_slice(&0x010Fu16.to_le_bytes());
        tiff.extend_from_slice(&2u16.to_le_bytes());
        tiff.extend_from_slice(&4u32.to_le_bytes());
        tiff.extend_from_slice(b"Cam\0");
        // 0x0110 Model, ASCII, 8 bytes at offset 38
        tiff.extend_from_slice(&0x0110u16.to_le_bytes());
        tiff.extend_from_slice(&2u16.to_le_bytes());
        tiff.extend_from_slice(&8u32.to_le_bytes());
        tiff.extend_from_slice(&38u32.to_le_bytes());
        tiff.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(tiff.len(), 38);
        tiff.extend_from_slice(b"Model12\0");

        let original = jpeg_with_tiff(&tiff);
        let updated = with_user_comment(&original, "tagged").unwrap().unwrap();

        let (start, end) = find_exif_segment(&updated).unwrap().unwrap();
        let parsed = tiff_of_segment(&updated, start, end).unwrap();
        assert_eq!(parsed.order, ByteOrder::Little);
        assert_eq!(parsed.ifd0.entry(0x010F).unwrap().data, b"Cam\0");
        assert_eq!(parsed.ifd0.entry(0x0110).unwrap().data, b"Model12\0");
        assert_eq!(parsed.user_comment(), Some("tagged".to_string()));
    }

    #[test]
    fn test_tiff_rewrite_is_stable() {
        let mut tiff = Tiff::empty();
        tiff.set_user_comment("abc");
        tiff.ifd1 = Some(Ifd {
            entries: vec![
                Entry {
                    tag: TAG_THUMBNAIL_OFFSET,
                    kind: TYPE_LONG,
                    count: 1,
                    data: vec![0; 4],
                },
                Entry {
                    tag: TAG_THUMBNAIL_LENGTH,
                    kind: TYPE_LONG,
                    count: 1,
                    data: 3u32.to_be_bytes().to_vec(),
                },
            ],
            children: Vec::new(),
        });
        tiff.thumbnail = Some(vec![7, 8, 9]);

        let parsed = parse_tiff(&write_tiff(&tiff)).unwrap();
        assert_eq!(parsed.thumbnail, Some(vec![7, 8, 9]));
        assert_eq!(parsed.user_comment(), Some("abc".to_string()));
    }

    #[test]
    fn test_set_tag_on_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("public.jpg");
        std::fs::write(&path, sample_jpeg()).unwrap();

        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        assert_eq!(get_tag(&mut file).unwrap(), NO_DATA);
        assert_eq!(set_tag(&mut file, "T").unwrap(), "T");
        assert_eq!(get_tag(&mut file).unwrap(), "T");

        // Shorter rewrite truncates the file
        set_tag(&mut file, "a much longer comment").unwrap();
        set_tag(&mut file, "x").unwrap();
        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(read_user_comment(&on_disk).unwrap(), Some("x".to_string()));
        assert!(on_disk.ends_with(&[0xFF, 0xD9]));
    }

    #[test]
    fn test_set_tag_without_metadata_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"not an image").unwrap();

        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        assert_eq!(set_tag(&mut file, "T").unwrap(), NO_DATA);
        assert_eq!(std::fs::read(&path).unwrap(), b"not an image");
    }

    fn jpeg_with_damaged_exif() -> Vec<u8> {
        jpeg_with_tiff(b"garbage!")
    }

    #[test]
    fn test_damaged_exif_reads_as_no_comment() {
        assert_eq!(read_user_comment(&jpeg_with_damaged_exif()).unwrap(), None);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("damaged.jpg");
        std::fs::write(&path, jpeg_with_damaged_exif()).unwrap();
        let mut file = std::fs::File::open(&path).unwrap();
        assert_eq!(get_tag(&mut file).unwrap(), NO_DATA);
    }

    #[test]
    fn test_damaged_exif_is_replaced_on_tag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("damaged.jpg");
        std::fs::write(&path, jpeg_with_damaged_exif()).unwrap();

        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        assert_eq!(set_tag(&mut file, "HelloCat").unwrap(), "HelloCat");

        let on_disk = std::fs::read(&path).unwrap();
        assert!(on_disk.ends_with(&[0x12, 0x34, 0x56, 0xFF, 0xD9]));
        let app1_count = on_disk.windows(2).filter(|w| w[0] == 0xFF && w[1] == MARKER_APP1).count();
        assert_eq!(app1_count, 1);
    }

    #[test]
    fn test_broken_segment_chain_has_no_metadata_block() {
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x7F, 0xFF];
        data.extend_from_slice(b"short");
        assert_eq!(read_user_comment(&data).unwrap(), None);
        assert_eq!(with_user_comment(&data, "x").unwrap(), None);
    }
}
