//! Collision-free on-disk path allocation.
//!
//! Filenames stay deterministic and human-readable in the common case
//! (`clip.mp4`, `clip_1.mp4`, ...); after too many collisions the counter
//! scheme is abandoned for a random suffix so allocation stays bounded.
//! The check-then-create window is accepted: names are per-job and two jobs
//! racing on the same base land on different suffixes in practice.

use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Collisions probed before falling back to a random suffix.
pub const MAX_COLLISION_PROBES: u32 = 100;

/// Allocate a path for `base` + `ext_with_dot` inside `directory` that does
/// not exist at call time. Returns the absolute path and the bare filename.
pub async fn allocate(
    directory: &Path,
    base: &str,
    ext_with_dot: &str,
) -> io::Result<(PathBuf, String)> {
    let mut filename = format!("{base}{ext_with_dot}");
    let mut path = directory.join(&filename);
    let mut counter = 0u32;

    while tokio::fs::try_exists(&path).await? {
        counter += 1;
        if counter > MAX_COLLISION_PROBES {
            tracing::error!(
                base = %base,
                directory = %directory.display(),
                "high collision count allocating unique path, falling back to random suffix"
            );
            filename = format!("{base}_{}{ext_with_dot}", Uuid::new_v4().simple());
            path = directory.join(&filename);
            break;
        }
        filename = format!("{base}_{counter}{ext_with_dot}");
        path = directory.join(&filename);
    }

    Ok((path, filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_allocation_uses_the_plain_name() {
        let dir = tempfile::tempdir().unwrap();
        let (path, name) = allocate(dir.path(), "clip", ".mp4").await.unwrap();
        assert_eq!(name, "clip.mp4");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn collisions_increment_a_counter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clip.mp4"), b"").unwrap();
        std::fs::write(dir.path().join("clip_1.mp4"), b"").unwrap();

        let (path, name) = allocate(dir.path(), "clip", ".mp4").await.unwrap();
        assert_eq!(name, "clip_2.mp4");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn heavy_collisions_fall_back_to_a_random_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clip.mp4"), b"").unwrap();
        for i in 1..=MAX_COLLISION_PROBES {
            std::fs::write(dir.path().join(format!("clip_{i}.mp4")), b"").unwrap();
        }

        let (path, name) = allocate(dir.path(), "clip", ".mp4").await.unwrap();
        assert!(name.starts_with("clip_"));
        assert!(name.ends_with(".mp4"));
        assert_ne!(name, format!("clip_{}.mp4", MAX_COLLISION_PROBES + 1));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn repeated_allocations_never_return_an_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        for _ in 0..10 {
            let (path, _) = allocate(dir.path(), "photo", ".jpg").await.unwrap();
            assert!(!path.exists());
            std::fs::write(&path, b"").unwrap();
        }
    }
}
