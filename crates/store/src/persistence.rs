use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

/// Writes `value` to `path` as `tmp -> fsync -> rename`, the only durability
/// guarantee this system offers: a crash mid-write never leaves a partial
/// file in place of the prior good snapshot.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp_path = tmp_path_for(path);
    let file = std::fs::File::create(&tmp_path)?;
    {
        use std::io::Write;
        let mut writer = io::BufWriter::new(&file);
        writer.write_all(&bytes)?;
        writer.flush()?;
    }
    file.sync_all()?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Loads a JSON document from `path`. A missing or empty file yields
/// `Ok(None)` rather than an error, so the loader can fall back to defaults.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(None),
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Coalesces concurrent save requests into "one save in flight + one
/// pending", so a burst of mutations does not serialize a write per
/// mutation. `request_save` marks the document dirty and spawns a writer if
/// none is already running; a writer that finishes while new dirt has
/// accumulated re-runs once more before going idle.
#[derive(Clone)]
pub struct CoalescingSaver {
    path: PathBuf,
    in_flight: Arc<AtomicBool>,
    lock: Arc<Mutex<()>>,
}

impl CoalescingSaver {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            in_flight: Arc::new(AtomicBool::new(false)),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Requests a save of `snapshot_fn`'s current output. If a save is
    /// already running, this call marks the document dirty and returns
    /// immediately; the running save will loop once more before idling.
    pub fn request_save<F, T>(&self, snapshot_fn: F)
    where
        F: Fn() -> T + Send + 'static,
        T: Serialize + Send + 'static,
    {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        let path = self.path.clone();
        let in_flight = self.in_flight.clone();
        let lock = self.lock.clone();
        tokio::spawn(async move {
            let _guard = lock.lock().await;
            loop {
                let snapshot = snapshot_fn();
                if let Err(e) = atomic_write_json(&path, &snapshot) {
                    tracing::error!(error = %e, path = %path.display(), "state save failed");
                }
                // Clear the flag, then check if a racer set it again while we
                // were writing; if so, loop once more before going idle.
                in_flight.store(false, Ordering::Release);
                if !in_flight.swap(true, Ordering::AcqRel) {
                    break;
                }
            }
            in_flight.store(false, Ordering::Release);
        });
    }
}
