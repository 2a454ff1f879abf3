//! Binary container used to persist the proxy state across restarts.
//!
//! Layout:
//!
//! ```text
//! | metadata-size: u64 LE | metadata | payload |
//! ```
//!
//! `metadata` is a fixed-width little-endian record:
//!
//! ```text
//! version      : u64
//! storage      : u64
//! spec_version : u64 length followed by UTF-8 bytes
//! ```
//!
//! `payload` is gzip-compressed and opaque to this module.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

const METADATA_SIZE_LEN: usize = 8;

#[derive(thiserror::Error, Debug)]
pub enum SnapshotError {
    #[error("cannot find snapshot file {0:?}")]
    NonexistentFile(PathBuf),

    #[error("invalid snapshot size")]
    Size,

    #[error("snapshot metadata cannot be encoded: {0}")]
    EncodeMetadata(#[from] bincode::error::EncodeError),

    #[error("snapshot metadata cannot be decoded: {0}")]
    DecodeMetadata(#[from] bincode::error::DecodeError),

    #[error("snapshot data is not valid gzip: {0}")]
    Compression(io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Describes how the payload was produced. Values this build does not know
/// about are kept as `Unknown` so they survive a decode/encode cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub enum StorageKind {
    Memory,
    Unknown(u64),
}

impl From<u64> for StorageKind {
    fn from(value: u64) -> Self {
        match value {
            1 => StorageKind::Memory,
            other => StorageKind::Unknown(other),
        }
    }
}

impl From<StorageKind> for u64 {
    fn from(kind: StorageKind) -> Self {
        match kind {
            StorageKind::Memory => 1,
            StorageKind::Unknown(other) => other,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub version: u64,
    pub storage: StorageKind,
    pub spec_version: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    meta: Metadata,
    // Always gzip-compressed
    data: Vec<u8>,
}

// Upper bound on the decoded metadata. Length prefixes beyond it are rejected
// before anything is allocated.
const METADATA_LIMIT: usize = 64 * 1024;

fn metadata_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
        .with_limit::<METADATA_LIMIT>()
}

impl Snapshot {
    pub fn new(meta: Metadata, raw: &[u8]) -> Result<Self, SnapshotError> {
        let mut snapshot = Snapshot {
            meta,
            data: Vec::new(),
        };
        snapshot.set_data(raw)?;
        Ok(snapshot)
    }

    pub fn meta(&self) -> &Metadata {
        &self.meta
    }

    /// Compressed payload size in bytes.
    pub fn compressed_len(&self) -> usize {
        self.data.len()
    }

    pub fn set_data(&mut self, raw: &[u8]) -> Result<(), SnapshotError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(raw).map_err(SnapshotError::Compression)?;
        self.data = encoder.finish().map_err(SnapshotError::Compression)?;
        Ok(())
    }

    /// Returns the decompressed payload.
    pub fn data(&self) -> Result<Vec<u8>, SnapshotError> {
        let mut decoder = GzDecoder::new(self.data.as_slice());
        let mut raw = Vec::new();
        decoder
            .read_to_end(&mut raw)
            .map_err(SnapshotError::Compression)?;
        Ok(raw)
    }

    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        let meta_bytes = bincode::serde::encode_to_vec(&self.meta, metadata_config())?;

        let mut encoded =
            Vec::with_capacity(METADATA_SIZE_LEN + meta_bytes.len() + self.data.len());
        encoded.extend_from_slice(&(meta_bytes.len() as u64).to_le_bytes());
        encoded.extend_from_slice(&meta_bytes);
        encoded.extend_from_slice(&self.data);
        Ok(encoded)
    }

    /// Splits an encoded snapshot into metadata and payload. The payload is
    /// kept compressed until `data` is called.
    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let (size_bytes, rest) = bytes
            .split_first_chunk::<METADATA_SIZE_LEN>()
            .ok_or(SnapshotError::Size)?;

        let meta_size = usize::try_from(u64::from_le_bytes(*size_bytes))
            .map_err(|_| SnapshotError::Size)?;
        if meta_size > rest.len() {
            return Err(SnapshotError::Size);
        }

        let (meta_bytes, data) = rest.split_at(meta_size);
        let (meta, _): (Metadata, usize) =
            bincode::serde::decode_from_slice(meta_bytes, metadata_config())?;

        Ok(Snapshot {
            meta,
            data: data.to_vec(),
        })
    }

    pub fn decode_from_file<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(SnapshotError::NonexistentFile(path.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };
        Self::decode(&bytes)
    }

    /// Writes the encoded snapshot to `path`, replacing any existing file only
    /// once the new contents are fully written.
    pub fn encode_to_file<P: AsRef<Path>>(&self, path: P) -> Result<usize, SnapshotError> {
        let path = path.as_ref();
        let encoded = self.encode()?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&encoded)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;

        Ok(encoded.len())
    }

    /// Writes the decompressed payload to `path`.
    pub fn write_data_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), SnapshotError> {
        let raw = self.data()?;
        fs::write(path, raw)?;
        Ok(())
    }

    /// Writes the decompressed payload to a new file in the OS temp directory
    /// and returns its path. The caller owns the file.
    pub fn write_data_to_tmp_file(&self) -> Result<PathBuf, SnapshotError> {
        let raw = self.data()?;
        let mut tmp = tempfile::Builder::new()
            .prefix("split.proxy.")
            .suffix(".data")
            .tempfile()?;
        tmp.write_all(&raw)?;
        let (_, path) = tmp.keep().map_err(|e| e.error)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_metadata() -> Metadata {
        Metadata {
            version: 123456,
            storage: StorageKind::Memory,
            spec_version: "1.1".into(),
        }
    }

    #[test]
    fn test_encode_decode() {
        let snapshot = Snapshot::new(get_metadata(), b"Some Snapshot Data").unwrap();
        let encoded = snapshot.encode().unwrap();

        let decoded = Snapshot::decode(&encoded).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.meta(), &get_metadata());
        assert_eq!(decoded.data().unwrap(), b"Some Snapshot Data");
    }

    #[test]
    fn test_metadata_layout() {
        let snapshot = Snapshot::new(get_metadata(), b"").unwrap();
        let encoded = snapshot.encode().unwrap();

        // 8 (version) + 8 (storage) + 8 (string length) + 3 ("1.1")
        assert_eq!(&encoded[0..8], &27u64.to_le_bytes());
        assert_eq!(&encoded[8..16], &123456u64.to_le_bytes());
        assert_eq!(&encoded[16..24], &1u64.to_le_bytes());
        assert_eq!(&encoded[24..32], &3u64.to_le_bytes());
        assert_eq!(&encoded[32..35], b"1.1");
        // gzip magic
        assert_eq!(&encoded[35..37], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_unknown_storage_kind_is_preserved() {
        let meta = Metadata {
            version: 9,
            storage: StorageKind::Unknown(4321),
            spec_version: String::new(),
        };
        let snapshot = Snapshot::new(meta.clone(), b"data").unwrap();
        let decoded = Snapshot::decode(&snapshot.encode().unwrap()).unwrap();
        assert_eq!(decoded.meta(), &meta);
        assert_eq!(
            Snapshot::decode(&decoded.encode().unwrap()).unwrap().meta(),
            &meta
        );
    }

    #[test]
    fn test_size_errors() {
        for input in [&b""[..], &b"\x01\x00"[..], &[0u8; 7][..]] {
            assert!(matches!(Snapshot::decode(input), Err(SnapshotError::Size)));
        }

        // Declared metadata size larger than the remaining buffer
        let mut bytes = 100u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 20]);
        assert!(matches!(Snapshot::decode(&bytes), Err(SnapshotError::Size)));

        let bytes = u64::MAX.to_le_bytes();
        assert!(matches!(Snapshot::decode(&bytes), Err(SnapshotError::Size)));
    }

    #[test]
    fn test_malformed_metadata() {
        let mut bytes = 4u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[1, 2, 3, 4]);
        assert!(matches!(
            Snapshot::decode(&bytes),
            Err(SnapshotError::DecodeMetadata(_))
        ));

        // A corrupt spec version length must fail instead of allocating it
        for len in [1u64 << 40, u64::MAX] {
            let mut bytes = 24u64.to_le_bytes().to_vec();
            bytes.extend_from_slice(&1u64.to_le_bytes());
            bytes.extend_from_slice(&1u64.to_le_bytes());
            bytes.extend_from_slice(&len.to_le_bytes());
            assert!(matches!(
                Snapshot::decode(&bytes),
                Err(SnapshotError::DecodeMetadata(_))
            ));
        }
    }

    #[test]
    fn test_invalid_gzip_payload() {
        let snapshot = Snapshot::new(get_metadata(), b"data").unwrap();
        let mut encoded = snapshot.encode().unwrap();
        let payload_start = encoded.len() - snapshot.compressed_len();
        encoded.truncate(payload_start);
        encoded.extend_from_slice(b"definitely not gzip");

        // Decoding is lazy, the payload is only checked on access
        let decoded = Snapshot::decode(&encoded).unwrap();
        assert!(matches!(decoded.data(), Err(SnapshotError::Compression(_))));
    }

    #[test]
    fn test_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.snapshot");

        let snapshot = Snapshot::new(get_metadata(), b"file data").unwrap();
        let written = snapshot.encode_to_file(&path).unwrap();
        assert_eq!(written as u64, fs::metadata(&path).unwrap().len());

        let loaded = Snapshot::decode_from_file(&path).unwrap();
        assert_eq!(loaded, snapshot);

        let data_path = dir.path().join("proxy.data");
        loaded.write_data_to_file(&data_path).unwrap();
        assert_eq!(fs::read(&data_path).unwrap(), b"file data");

        let tmp_path = loaded.write_data_to_tmp_file().unwrap();
        assert_eq!(fs::read(&tmp_path).unwrap(), b"file data");
        fs::remove_file(tmp_path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Snapshot::decode_from_file(dir.path().join("missing"));
        assert!(matches!(result, Err(SnapshotError::NonexistentFile(_))));
    }
}
