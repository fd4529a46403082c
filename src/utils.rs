use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

/// Replace `path` with `contents` without ever exposing a partial file.
///
/// Each call writes its own uniquely named temp file next to the target and
/// renames it into place, so concurrent writers never share a temp file and
/// the last rename wins. The parent directory is created if needed.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            tokio::fs::create_dir_all(parent).await?;
            parent.to_path_buf()
        }
        None => PathBuf::from("."),
    };

    let path = path.to_path_buf();
    let contents = contents.to_vec();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&contents)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
}

/// Random extra delay of up to half of `delay`, for retry backoff.
pub fn jitter(delay: Duration) -> Duration {
    delay.mul_f32(fastrand::f32() * 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_atomic_creates_parent_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.json");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert_eq!(std::fs::read_dir(dir.path().join("nested")).unwrap().count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_to_one_path_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");

        let writes = (0..16).map(|i| {
            let path = path.clone();
            tokio::spawn(async move { write_atomic(&path, format!("writer {}", i).as_bytes()).await })
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap().unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("writer "));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_jitter_bounds() {
        let delay = Duration::from_millis(400);
        for _ in 0..100 {
            assert!(jitter(delay) <= Duration::from_millis(200));
        }
    }
}
