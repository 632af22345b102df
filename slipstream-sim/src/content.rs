//! Content the simulated swarm can serve.

use std::sync::Arc;

use bytes::Bytes;
use sha1::{Digest, Sha1};

use slipstream_core::engine::TorrentInfo;

/// A torrent the simulator knows how to serve: full metadata plus the
/// payload bytes behind it.
#[derive(Debug, Clone)]
pub struct SeededTorrent {
    /// Metadata with real piece hashes computed over the payload.
    pub info: Arc<TorrentInfo>,
    /// The torrent's payload, files concatenated in table order.
    pub payload: Bytes,
}

impl SeededTorrent {
    /// Builds a single-file torrent over `payload`.
    pub fn single_file(name: &str, payload: impl Into<Bytes>, piece_length: u32) -> Self {
        let payload = payload.into();
        let info = TorrentInfo::from_parts(
            name,
            piece_length,
            piece_hashes(&payload, piece_length),
            vec![(name.to_string(), payload.len() as u64)],
            Vec::new(),
        )
        .expect("seeded torrent geometry is consistent");
        Self {
            info: Arc::new(info),
            payload,
        }
    }

    /// Builds a multi-file torrent; `files` are `(path, contents)`
    /// pairs in payload order.
    pub fn multi_file(name: &str, files: &[(&str, Bytes)], piece_length: u32) -> Self {
        let mut payload = Vec::new();
        let mut table = Vec::new();
        for (path, contents) in files {
            table.push((path.to_string(), contents.len() as u64));
            payload.extend_from_slice(contents);
        }
        let payload = Bytes::from(payload);
        let info = TorrentInfo::from_parts(
            name,
            piece_length,
            piece_hashes(&payload, piece_length),
            table,
            Vec::new(),
        )
        .expect("seeded torrent geometry is consistent");
        Self {
            info: Arc::new(info),
            payload,
        }
    }

    /// A magnet URI selecting this torrent.
    pub fn magnet_uri(&self) -> String {
        format!(
            "magnet:?xt=urn:btih:{}&dn={}",
            self.info.info_hash(),
            self.info.name()
        )
    }

    /// The canonical bencoded `.torrent` body.
    ///
    /// # Errors
    /// - [`slipstream_core::EngineError`] when serialization fails,
    ///   which consistent seeded metadata never does.
    pub fn torrent_body(&self) -> Result<Vec<u8>, slipstream_core::EngineError> {
        self.info.to_bencode()
    }
}

fn piece_hashes(payload: &[u8], piece_length: u32) -> Vec<[u8; 20]> {
    payload
        .chunks(piece_length as usize)
        .map(|chunk| {
            let mut hasher = Sha1::new();
            hasher.update(chunk);
            hasher.finalize().into()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_torrent_roundtrips_through_bencode() {
        let seeded = SeededTorrent::single_file("clip.bin", vec![9u8; 100], 16);
        assert_eq!(seeded.info.num_pieces(), 7);

        let body = seeded.torrent_body().unwrap();
        let parsed = TorrentInfo::from_bencode(&body).unwrap();
        assert_eq!(parsed.info_hash(), seeded.info.info_hash());
    }

    #[test]
    fn test_magnet_uri_carries_the_info_hash() {
        let seeded = SeededTorrent::single_file("clip.bin", vec![1u8; 64], 16);
        let uri = seeded.magnet_uri();
        assert!(uri.starts_with("magnet:?xt=urn:btih:"));
        assert!(uri.contains(&seeded.info.info_hash().to_string()));
    }

    #[test]
    fn test_multi_file_concatenates_payload() {
        let seeded = SeededTorrent::multi_file(
            "bundle",
            &[
                ("a.bin", Bytes::from(vec![1u8; 10])),
                ("b.bin", Bytes::from(vec![2u8; 22])),
            ],
            16,
        );
        assert_eq!(seeded.payload.len(), 32);
        assert_eq!(seeded.info.files().len(), 2);
        assert_eq!(seeded.info.files()[1].offset, 10);
    }
}
