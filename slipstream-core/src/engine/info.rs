//! Torrent metadata: the parsed `.torrent` info structure.
//!
//! [`TorrentInfo`] is the engine-library view of a torrent body: name,
//! piece geometry, file table and trackers, plus the `map_file`
//! operation the streaming controller uses to translate file offsets
//! into piece ranges. Serialization goes through `serde_bencode` derive
//! structs whose fields are declared in bencode key order, so
//! re-encoding is canonical and the info hash is stable across a cache
//! round trip.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_bencode::{de, ser};
use serde_bytes::ByteBuf;
use sha1::{Digest, Sha1};

use super::{EngineError, InfoHash, PieceIndex};

/// A single file within a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the torrent root, `/`-joined.
    pub path: String,
    /// File size in bytes.
    pub length: u64,
    /// Absolute byte offset of the file within the torrent payload.
    pub offset: u64,
}

/// A byte range of one file mapped onto the torrent's piece space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSlice {
    /// First piece containing the range.
    pub piece: PieceIndex,
    /// Offset of the range's first byte within that piece.
    pub start: u64,
    /// Length of the mapped range in bytes.
    pub length: u64,
}

/// Parsed torrent metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentInfo {
    info_hash: InfoHash,
    name: String,
    piece_length: u32,
    piece_hashes: Vec<[u8; 20]>,
    total_length: u64,
    files: Vec<FileEntry>,
    trackers: Vec<String>,
}

impl TorrentInfo {
    /// Decodes a bencoded `.torrent` body.
    ///
    /// # Errors
    /// - [`EngineError::InvalidTorrentFile`] on malformed bencode,
    ///   inconsistent piece geometry, or an empty file table.
    pub fn from_bencode(body: &[u8]) -> Result<Self, EngineError> {
        let raw: RawTorrent = de::from_bytes(body).map_err(|err| invalid(err.to_string()))?;
        Self::from_raw(raw)
    }

    /// Reads and decodes a `.torrent` file from disk.
    ///
    /// # Errors
    /// - [`EngineError::Io`] when the file cannot be read.
    /// - [`EngineError::InvalidTorrentFile`] when the body is malformed.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let body = std::fs::read(path)?;
        Self::from_bencode(&body)
    }

    /// Builds metadata from its constituent parts, computing file
    /// offsets and the info hash. This is how engine implementations
    /// synthesize metadata they received over the wire.
    ///
    /// # Errors
    /// - [`EngineError::InvalidTorrentFile`] when the piece hashes do
    ///   not cover the file table exactly.
    pub fn from_parts(
        name: impl Into<String>,
        piece_length: u32,
        piece_hashes: Vec<[u8; 20]>,
        files: Vec<(String, u64)>,
        trackers: Vec<String>,
    ) -> Result<Self, EngineError> {
        let name = name.into();
        if files.is_empty() {
            return Err(invalid("torrent has no files"));
        }
        let mut offset = 0;
        let entries: Vec<FileEntry> = files
            .into_iter()
            .map(|(path, length)| {
                let entry = FileEntry {
                    path,
                    length,
                    offset,
                };
                offset += length;
                entry
            })
            .collect();
        let info = Self::assemble(name, piece_length, piece_hashes, entries, trackers)?;
        Ok(info)
    }

    fn from_raw(raw: RawTorrent) -> Result<Self, EngineError> {
        let name = raw.info.name.clone();
        let piece_length = raw.info.piece_length;
        let pieces = raw.info.pieces.as_ref();
        if pieces.is_empty() || pieces.len() % 20 != 0 {
            return Err(invalid("piece hash string is not a multiple of 20 bytes"));
        }
        let piece_hashes = pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let mut offset = 0;
        let entries = match (&raw.info.files, raw.info.length) {
            (Some(files), _) => files
                .iter()
                .map(|file| {
                    let entry = FileEntry {
                        path: file.path.join("/"),
                        length: file.length,
                        offset,
                    };
                    offset += file.length;
                    entry
                })
                .collect(),
            (None, Some(length)) => vec![FileEntry {
                path: name.clone(),
                length,
                offset: 0,
            }],
            (None, None) => return Err(invalid("torrent has neither length nor files")),
        };

        let trackers = match (raw.announce, raw.announce_list) {
            (_, Some(tiers)) => tiers.into_iter().flatten().collect(),
            (Some(announce), None) => vec![announce],
            (None, None) => Vec::new(),
        };

        Self::assemble(name, piece_length, piece_hashes, entries, trackers)
    }

    fn assemble(
        name: String,
        piece_length: u32,
        piece_hashes: Vec<[u8; 20]>,
        files: Vec<FileEntry>,
        trackers: Vec<String>,
    ) -> Result<Self, EngineError> {
        if piece_length == 0 {
            return Err(invalid("piece length is zero"));
        }
        if files.is_empty() {
            return Err(invalid("torrent has no files"));
        }
        let total_length: u64 = files.iter().map(|file| file.length).sum();
        if total_length == 0 {
            return Err(invalid("torrent payload is empty"));
        }
        let expected = total_length.div_ceil(u64::from(piece_length));
        if piece_hashes.len() as u64 != expected {
            return Err(invalid(format!(
                "{} piece hashes do not cover {total_length} bytes at {piece_length} per piece",
                piece_hashes.len()
            )));
        }

        let mut info = Self {
            info_hash: InfoHash::new([0; 20]),
            name,
            piece_length,
            piece_hashes,
            total_length,
            files,
            trackers,
        };
        let body = ser::to_bytes(&info.raw_info()).map_err(|err| invalid(err.to_string()))?;
        let mut hasher = Sha1::new();
        hasher.update(&body);
        info.info_hash = InfoHash::new(hasher.finalize().into());
        Ok(info)
    }

    /// Serializes the canonical `.torrent` body for this metadata.
    ///
    /// # Errors
    /// - [`EngineError::InvalidTorrentFile`] when bencode serialization
    ///   fails.
    pub fn to_bencode(&self) -> Result<Vec<u8>, EngineError> {
        let raw = RawTorrent {
            announce: self.trackers.first().cloned(),
            announce_list: (self.trackers.len() > 1).then(|| vec![self.trackers.clone()]),
            info: self.raw_info(),
        };
        ser::to_bytes(&raw).map_err(|err| invalid(err.to_string()))
    }

    fn raw_info(&self) -> RawInfo {
        let single_file =
            self.files.len() == 1 && self.files[0].path == self.name && self.files[0].offset == 0;
        let mut pieces = Vec::with_capacity(self.piece_hashes.len() * 20);
        for hash in &self.piece_hashes {
            pieces.extend_from_slice(hash);
        }
        RawInfo {
            files: (!single_file).then(|| {
                self.files
                    .iter()
                    .map(|file| RawFile {
                        length: file.length,
                        path: file.path.split('/').map(str::to_string).collect(),
                    })
                    .collect()
            }),
            length: single_file.then(|| self.files[0].length),
            name: self.name.clone(),
            piece_length: self.piece_length,
            pieces: ByteBuf::from(pieces),
        }
    }

    /// SHA-1 of the info dictionary.
    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Torrent display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Nominal piece size; the final piece may be shorter.
    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    /// Number of pieces in the torrent.
    pub fn num_pieces(&self) -> u32 {
        self.piece_hashes.len() as u32
    }

    /// Actual size of one piece, accounting for final-piece truncation.
    pub fn piece_size(&self, piece: PieceIndex) -> u32 {
        let index = u64::from(piece.as_u32());
        let nominal = u64::from(self.piece_length);
        let start = index * nominal;
        (self.total_length - start).min(nominal) as u32
    }

    /// Total payload size across all files.
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// The torrent's file table, in payload order.
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    /// Announce URLs, flattened across tiers.
    pub fn trackers(&self) -> &[String] {
        &self.trackers
    }

    /// Expected SHA-1 digest of one piece.
    pub fn piece_hash(&self, piece: PieceIndex) -> Option<&[u8; 20]> {
        self.piece_hashes.get(piece.as_u32() as usize)
    }

    /// Maps `size` bytes of file `file_index` starting at `offset` onto
    /// the torrent's piece space. The range is clamped to the file's
    /// end. Returns `None` for an out-of-range file index.
    pub fn map_file(&self, file_index: u32, offset: u64, size: u64) -> Option<FileSlice> {
        let file = self.files.get(file_index as usize)?;
        let offset = offset.min(file.length);
        let length = size.min(file.length - offset);
        let absolute = file.offset + offset;
        let nominal = u64::from(self.piece_length);
        Some(FileSlice {
            piece: PieceIndex::new((absolute / nominal) as u32),
            start: absolute % nominal,
            length,
        })
    }

    /// Convenience wrapper returning the metadata behind an `Arc`.
    pub fn into_shared(self) -> Arc<TorrentInfo> {
        Arc::new(self)
    }
}

fn invalid(reason: impl Into<String>) -> EngineError {
    EngineError::InvalidTorrentFile {
        reason: reason.into(),
    }
}

// Wire-format structs. Field declaration order matches bencode key
// order, which keeps serialization canonical.

#[derive(Serialize, Deserialize)]
struct RawTorrent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    announce: Option<String>,
    #[serde(
        rename = "announce-list",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    announce_list: Option<Vec<Vec<String>>>,
    info: RawInfo,
}

#[derive(Serialize, Deserialize)]
struct RawInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    files: Option<Vec<RawFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    name: String,
    #[serde(rename = "piece length")]
    piece_length: u32,
    pieces: ByteBuf,
}

#[derive(Serialize, Deserialize)]
struct RawFile {
    length: u64,
    path: Vec<String>,
}
