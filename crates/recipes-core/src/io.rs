use crate::error::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `data` to `path` via a temp file in the same directory, so readers
/// never see a half-written config or key.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    persist(path, data, false)
}

/// Like [`atomic_write`], but the file is readable by the owner only.
pub fn write_secret(path: &Path, data: &[u8]) -> Result<()> {
    persist(path, data, true)
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

fn persist(path: &Path, data: &[u8], owner_only: bool) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    ensure_dir(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    #[cfg(unix)]
    if owner_only {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = owner_only;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
