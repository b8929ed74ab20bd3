use std::io;
use std::path::Path;

/// Remove `path`, treating an already-missing file as success.
pub fn delete_file_if_exists(path: impl AsRef<Path>) -> io::Result<bool> {
    match std::fs::remove_file(path.as_ref()) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deletes_existing_and_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("partial.bin");
        std::fs::write(&file, b"abc").unwrap();

        assert!(delete_file_if_exists(&file).unwrap());
        assert!(!file.exists());
        assert!(!delete_file_if_exists(&file).unwrap());
    }
}
