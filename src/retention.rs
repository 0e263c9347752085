use std::{
    io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tokio::{sync::broadcast::Receiver, task::JoinHandle};

/// Output names are derived from the artifact stem, optionally prefixed.
fn is_invocation_output(name: &str) -> bool {
    let name = name
        .strip_prefix("result-")
        .or_else(|| name.strip_prefix("label_analysis-"))
        .unwrap_or(name);
    name.starts_with("in-")
}

/// Removes invocation outputs under `run_dir` (and its `labels` directory)
/// last modified more than `max_age` ago. Returns how many files went away.
pub fn prune_outputs(run_dir: &Path, max_age: Duration) -> io::Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;

    for dir in [run_dir.to_path_buf(), run_dir.join("labels")] {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file()
                || !is_invocation_output(&entry.file_name().to_string_lossy())
            {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= max_age {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
    }

    Ok(removed)
}

/// Prunes `run_dir` periodically until shutdown is signalled.
pub fn spawn_sweeper(
    run_dir: PathBuf,
    max_age: Duration,
    mut shutdown_rx: Receiver<()>,
) -> JoinHandle<()> {
    let period = (max_age / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let dir = run_dir.clone();
                    match tokio::task::spawn_blocking(move || prune_outputs(&dir, max_age)).await {
                        Ok(Ok(0)) => {}
                        Ok(Ok(removed)) => tracing::debug!("Pruned {} expired outputs", removed),
                        Ok(Err(e)) => tracing::warn!("Failed to prune {:?}: {}", run_dir, e),
                        Err(e) => tracing::warn!("Output sweeper failed: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}
