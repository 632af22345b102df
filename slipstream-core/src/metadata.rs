//! Magnet metadata acquisition.
//!
//! Runs only when the add-parameters lack a torrent body. The event
//! pump is driven synchronously on the calling thread: failure stays a
//! plain return value, and no session driver exists yet to race against
//! the transient add/remove pair used to synthesize the `.torrent`.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache;
use crate::engine::{AddTorrentParams, TorrentHandle, TorrentInfo, TorrentSession};
use crate::session::{drive, PumpMode, SessionContext};
use crate::{AccessError, Result};

/// Ensures `params` carry torrent metadata, fetching it from the swarm
/// if the cache has no copy. Returns the path of the cached `.torrent`
/// body, which becomes the access's public URI.
pub(crate) fn fetch_metadata<S: TorrentSession>(
    ctx: &SessionContext<S>,
    params: &mut AddTorrentParams,
) -> Result<PathBuf> {
    let name = cache::torrent_file_name(&params.info_hash);

    if let Some(path) = ctx.cache.lookup(&name) {
        match TorrentInfo::load(&path) {
            Ok(info) => {
                info!(path = %path.display(), "metadata loaded from cache");
                params.torrent_info = Some(Arc::new(info));
                return Ok(path);
            }
            Err(err) => {
                warn!(%err, "cached torrent body unreadable, refetching");
                ctx.cache.delete(&name);
            }
        }
    }

    ctx.session.enable_metadata_exchange();
    let handle = ctx
        .session
        .add_torrent(params)
        .map_err(|err| AccessError::MetadataFailed {
            reason: err.to_string(),
        })?;

    info!(info_hash = %params.info_hash, "fetching metadata from swarm");
    drive(ctx, PumpMode::UntilMetadata);

    let info = handle
        .torrent_info()
        .ok_or_else(|| AccessError::MetadataFailed {
            reason: "metadata transfer interrupted".to_string(),
        })?;
    let body = info
        .to_bencode()
        .map_err(|err| AccessError::MetadataFailed {
            reason: err.to_string(),
        })?;
    let path = ctx
        .cache
        .save(&name, &body)
        .ok_or_else(|| AccessError::MetadataFailed {
            reason: "could not cache the synthesized torrent body".to_string(),
        })?;

    // The transient torrent only existed to carry the metadata transfer.
    ctx.session.remove_torrent(handle, false);
    params.torrent_info = Some(info);
    info!(path = %path.display(), "metadata cached");
    Ok(path)
}
