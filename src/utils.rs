use std::path::Path;

use anyhow::Result;
use log::{debug, error};
use tokio::fs;

/// Asynchronously ensures that a directory exists, creating it if it does not.
/// This function is idempotent.
pub async fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        if let Err(e) = fs::create_dir_all(path).await {
            error!("Failed to create directory at {:?}: {}", path, e);
            return Err(e.into());
        }
        debug!("Created directory at: {:?}", path);
    }
    Ok(())
}

/// Renders a byte slice as space separated hex, e.g. `0a ff 01`
pub fn hex_preview(bytes: &[u8], limit: usize) -> String {
    let mut out = bytes
        .iter()
        .take(limit)
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ");
    if bytes.len() > limit {
        out.push_str(" ...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_directory_exists_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_directory_exists(&nested).await.unwrap();
        ensure_directory_exists(&nested).await.unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_hex_preview_truncates() {
        assert_eq!(hex_preview(&[0x0a, 0xff, 0x01], 8), "0a ff 01");
        assert_eq!(hex_preview(&[1, 2, 3], 2), "01 02 ...");
        assert_eq!(hex_preview(&[], 4), "");
    }
}
