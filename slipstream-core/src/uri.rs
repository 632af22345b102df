//! Location string parsing.
//!
//! The player hands over one percent-encoded location string; it is
//! either a magnet URI or a path to a `.torrent` file, possibly behind
//! the `torrent://` scheme the access layer itself advertises.

use std::path::Path;

use crate::engine::{self, AddTorrentParams, TorrentInfo};
use crate::{AccessError, Result};

pub(crate) const MAGNET_PREFIX: &str = "magnet:?";
pub(crate) const TORRENT_SCHEME: &str = "torrent://";

/// Translates a location string into engine add-parameters.
///
/// Magnet inputs produce parameters without torrent info (the metadata
/// fetcher fills them in later); file inputs carry the fully parsed
/// torrent body.
pub(crate) fn parse_location(location: &str) -> Result<AddTorrentParams> {
    let decoded = urlencoding::decode(location).map_err(|err| AccessError::InvalidUri {
        reason: format!("invalid percent-encoding: {err}"),
    })?;

    if decoded.starts_with(MAGNET_PREFIX) {
        let magnet = engine::parse_magnet_uri(&decoded).map_err(|err| AccessError::InvalidUri {
            reason: err.to_string(),
        })?;
        return Ok(AddTorrentParams::from_magnet(magnet));
    }

    let path = decoded.strip_prefix(TORRENT_SCHEME).unwrap_or(&decoded);
    let info = TorrentInfo::load(Path::new(path)).map_err(|err| AccessError::InvalidUri {
        reason: err.to_string(),
    })?;
    Ok(AddTorrentParams::from_info(info))
}

/// The public URI advertised for a cached torrent body.
pub(crate) fn cached_uri(path: &Path) -> String {
    format!("{TORRENT_SCHEME}{}", path.display())
}
