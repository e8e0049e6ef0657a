//! Map file header encoding.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::{FileIndex, MapFileError};

/// Magic bytes at the start of every map file.
pub const MAGIC: &[u8; 4] = b"MSRF";

/// Current header format version.
pub const FORMAT_VERSION: u32 = 1;

/// Fixed header length before the serialized index.
pub(crate) const HEADER_LEN: usize = 12;

/// Upper bound on the serialized index size; anything larger is corrupt.
const MAX_INDEX_LEN: u32 = 64 * 1024 * 1024;

/// Writes a map file with the given index and payload.
///
/// The file is written to a temporary sibling first and renamed into place.
pub fn write_map_file(path: &Path, index: &FileIndex, payload: &[u8]) -> Result<(), MapFileError> {
    let encoded = bincode::serialize(index).map_err(|e| MapFileError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let temp_path = path.with_extension("tmp");
    let file = File::create(&temp_path).map_err(|e| MapFileError::io(&temp_path, e))?;
    let mut writer = BufWriter::new(file);

    let write = |w: &mut BufWriter<File>| -> std::io::Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&FORMAT_VERSION.to_le_bytes())?;
        w.write_all(&(encoded.len() as u32).to_le_bytes())?;
        w.write_all(&encoded)?;
        w.write_all(payload)?;
        w.flush()
    };
    write(&mut writer).map_err(|e| MapFileError::io(&temp_path, e))?;
    drop(writer);

    std::fs::rename(&temp_path, path).map_err(|e| MapFileError::io(path, e))
}

/// Reads only the header and index of a map file.
pub fn read_file_index(path: &Path) -> Result<FileIndex, MapFileError> {
    let file = File::open(path).map_err(|e| MapFileError::io(path, e))?;
    let mut reader = BufReader::new(file);

    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .map_err(|e| MapFileError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("truncated header: {}", e),
        })?;
    let index_len = check_header(path, &header)?;

    let mut encoded = vec![0u8; index_len];
    reader
        .read_exact(&mut encoded)
        .map_err(|e| MapFileError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("truncated index: {}", e),
        })?;
    decode_index(path, &encoded)
}

/// Parses the header of a mapped file.
///
/// Returns the index and the payload offset.
pub(crate) fn parse_header(path: &Path, bytes: &[u8]) -> Result<(FileIndex, usize), MapFileError> {
    if bytes.len() < HEADER_LEN {
        return Err(MapFileError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("file is only {} bytes", bytes.len()),
        });
    }
    let index_len = check_header(path, &bytes[..HEADER_LEN])?;
    let end = HEADER_LEN + index_len;
    if bytes.len() < end {
        return Err(MapFileError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("index needs {} bytes, file has {}", end, bytes.len()),
        });
    }
    let index = decode_index(path, &bytes[HEADER_LEN..end])?;
    Ok((index, end))
}

fn check_header(path: &Path, header: &[u8]) -> Result<usize, MapFileError> {
    if &header[0..4] != MAGIC {
        return Err(MapFileError::BadMagic {
            path: path.to_path_buf(),
        });
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != FORMAT_VERSION {
        return Err(MapFileError::UnsupportedVersion {
            path: path.to_path_buf(),
            version,
        });
    }
    let index_len = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
    if index_len > MAX_INDEX_LEN {
        return Err(MapFileError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("index length {} exceeds limit", index_len),
        });
    }
    Ok(index_len as usize)
}

fn decode_index(path: &Path, encoded: &[u8]) -> Result<FileIndex, MapFileError> {
    bincode::deserialize(encoded).map_err(|e| MapFileError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::QuadRect;
    use tempfile::TempDir;

    #[test]
    fn test_read_index_written_by_writer() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Germany_europe.obf");
        let index = FileIndex::single("germany", QuadRect::new(10, 20, 30, 40));

        write_map_file(&path, &index, b"payload").unwrap();

        assert_eq!(read_file_index(&path).unwrap(), index);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("junk.obf");
        std::fs::write(&path, b"NOPE0000000000000000").unwrap();

        let err = read_file_index(&path).unwrap_err();
        assert!(matches!(err, MapFileError::BadMagic { .. }));
    }

    #[test]
    fn test_truncated_index_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("short.obf");
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 10]);
        std::fs::write(&path, &bytes).unwrap();

        let err = read_file_index(&path).unwrap_err();
        assert!(matches!(err, MapFileError::Corrupt { .. }));

        let err = parse_header(&path, &bytes).unwrap_err();
        assert!(matches!(err, MapFileError::Corrupt { .. }));
    }

    #[test]
    fn test_unsupported_version() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("future.obf");
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&99u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let err = read_file_index(&path).unwrap_err();
        assert!(matches!(
            err,
            MapFileError::UnsupportedVersion { version: 99, .. }
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = read_file_index(Path::new("/nonexistent/file.obf")).unwrap_err();
        assert!(matches!(err, MapFileError::Io { .. }));
    }
}
