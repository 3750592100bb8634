#![forbid(unsafe_code)]

//! Process-level guards applied before the backend starts serving.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Refuses to start as root. The backend runs an external downloader on
/// arbitrary user-submitted URLs and writes wherever yt-dlp's filename
/// template points, so it belongs under an unprivileged account.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{process} must not be run as root; start tubegrab from an unprivileged account");
    }
    Ok(())
}
