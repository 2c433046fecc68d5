//! Atomic file persistence shared by the durable stores.
//!
//! Every durable mutation in the ledger is a full-document rewrite: the new
//! document is written to a randomly-named temp file in the target
//! directory, fsynced, then renamed over the real path. A reader never
//! observes a half-written file, and a crash mid-write leaves the previous
//! valid file intact.

use std::io::{self, Write as _};
use std::path::Path;

/// Writes `bytes` to `path` atomically via temp file + fsync + rename.
///
/// Creates the parent directory if it does not exist yet.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = dir {
        std::fs::create_dir_all(dir)?;
    }

    // NamedTempFile::new_in creates the file with a random name and O_EXCL,
    // avoiding predictable-temp-path races.
    let mut temp = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
        None => tempfile::NamedTempFile::new_in(".")?,
    };

    temp.as_file_mut().write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
