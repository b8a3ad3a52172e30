use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Replace `path` with `contents` so readers see either the old file or the
/// new one, never a partial write.
///
/// The temporary file is created in the destination directory so the final
/// rename stays on one filesystem.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// `write_atomic` on tokio's blocking pool, keeping the fsync off the
/// runtime threads.
pub async fn write_atomic_async(path: PathBuf, contents: Vec<u8>) -> io::Result<()> {
    tokio::task::spawn_blocking(move || write_atomic(&path, &contents))
        .await
        .map_err(io::Error::other)?
}
