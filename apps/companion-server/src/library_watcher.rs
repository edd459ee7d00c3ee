//! Polls the content library and drops cached source listings when it changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use companion_core::SourceResolver;
use sha2::{Digest, Sha256};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::tasks::{spawn_supervised, TaskHandle};

pub(crate) fn start(sources: Arc<dyn SourceResolver>, root: PathBuf, poll: Duration) -> TaskHandle {
    spawn_supervised("library.watch", move || watch(sources.clone(), root.clone(), poll))
}

async fn watch(sources: Arc<dyn SourceResolver>, root: PathBuf, poll: Duration) {
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last: Option<String> = None;
    loop {
        ticker.tick().await;
        let current = match fingerprint(&root).await {
            Ok(digest) => Some(digest),
            Err(err) => {
                if last.is_some() {
                    warn!(path = %root.display(), error = %err, "content library unreadable");
                }
                None
            }
        };
        if current == last {
            continue;
        }
        if last.is_some() {
            sources.invalidate();
            info!(path = %root.display(), "content library changed; source cache dropped");
        } else {
            debug!(path = %root.display(), "content library watch primed");
        }
        last = current;
    }
}

/// Digest of every source directory name and the modification times that
/// matter for listings.
pub(crate) async fn fingerprint(root: &Path) -> std::io::Result<String> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(root).await?;
    while let Some(entry) = dir.next_entry().await? {
        let path = entry.path();
        let mut line = entry.file_name().to_string_lossy().into_owned();
        for name in ["", "source.json", "links.json", "icon.png"] {
            let target = if name.is_empty() { path.clone() } else { path.join(name) };
            let stamp = tokio::fs::metadata(&target)
                .await
                .ok()
                .and_then(|md| md.modified().ok())
                .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            line.push_str(&format!("|{name}={stamp}"));
        }
        entries.push(line);
    }
    entries.sort();
    let mut hasher = Sha256::new();
    for line in &entries {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}
