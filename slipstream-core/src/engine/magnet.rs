//! Magnet URI parsing.
//!
//! Validation goes through the `magnet-url` crate; the info hash is
//! extracted from the raw `xt` parameter since that is the one field the
//! rest of the system cannot live without.

use super::{EngineError, InfoHash};

/// The fields of a magnet URI the engine needs to join a swarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetDescriptor {
    /// Identity of the torrent.
    pub info_hash: InfoHash,
    /// Suggested display name from the `dn` parameter.
    pub display_name: Option<String>,
    /// Tracker URLs from the `tr` parameters.
    pub trackers: Vec<String>,
}

/// Parses a magnet URI into engine add-parameters.
///
/// Supports the v1 `xt=urn:btih:<40-hex>` exact-topic form.
///
/// # Errors
/// - [`EngineError::InvalidMagnet`] when the URI is malformed or the
///   info hash is missing or unusable.
pub fn parse_magnet_uri(uri: &str) -> Result<MagnetDescriptor, EngineError> {
    let magnet = magnet_url::Magnet::new(uri).map_err(|err| EngineError::InvalidMagnet {
        reason: format!("{err:?}"),
    })?;

    let info_hash = extract_info_hash(uri)?;

    Ok(MagnetDescriptor {
        info_hash,
        display_name: magnet.dn.clone(),
        trackers: magnet.tr.clone(),
    })
}

fn extract_info_hash(uri: &str) -> Result<InfoHash, EngineError> {
    for param in uri.split(['?', '&']) {
        if let Some(value) = param.strip_prefix("xt=urn:btih:") {
            return InfoHash::from_hex(value).ok_or_else(|| EngineError::InvalidMagnet {
                reason: format!("unusable info hash: {value}"),
            });
        }
    }
    Err(EngineError::InvalidMagnet {
        reason: "missing xt=urn:btih parameter".to_string(),
    })
}
