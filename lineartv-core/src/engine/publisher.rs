use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use super::readiness::{segment_refs, MIN_SEGMENTS};
use super::slot::Slot;

pub const PUBLIC_MASTER: &str = "master.m3u8";
pub const PUBLIC_STREAM: &str = "stream.m3u8";

const PUBLISH_MIN_SEGMENT_BYTES: u64 = 5000;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("slot {slot} not ready: {reason}")]
    NotReady { slot: Slot, reason: String },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type PublishResult<T> = Result<T, PublishError>;

/// Retargets the channel's public playlist at one slot by byte-copying the
/// slot's playlist pair onto the stable names. Copies, never symlinks:
/// several static-server chains mishandle symlinked playlists. This is the
/// only writer of the public names.
#[derive(Debug, Clone)]
pub struct SlotPublisher {
    dir: PathBuf,
}

impl SlotPublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn publish(&self, slot: Slot) -> PublishResult<()> {
        let master = self.dir.join(slot.master_playlist());
        let stream = self.dir.join(slot.stream_playlist());

        self.verify_non_empty(slot, &master)?;
        self.verify_non_empty(slot, &stream)?;

        let text = fs::read_to_string(&stream).map_err(|source| PublishError::Io {
            source,
            path: stream.clone(),
        })?;
        let refs = segment_refs(&text, slot);
        if refs.len() < MIN_SEGMENTS {
            return Err(PublishError::NotReady {
                slot,
                reason: format!("{} segment references listed", refs.len()),
            });
        }

        let healthy = refs
            .iter()
            .take(3)
            .filter(|name| {
                fs::metadata(self.dir.join(name.as_str()))
                    .map(|meta| meta.len() >= PUBLISH_MIN_SEGMENT_BYTES)
                    .unwrap_or(false)
            })
            .count();
        if healthy < 2 {
            return Err(PublishError::NotReady {
                slot,
                reason: format!("only {healthy} of the leading segments are on disk"),
            });
        }

        for name in [PUBLIC_MASTER, PUBLIC_STREAM] {
            let public = self.dir.join(name);
            if let Err(err) = fs::remove_file(&public) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %public.display(), error = %err, "failed to unlink stale public playlist");
                }
            }
        }

        self.copy(&master, PUBLIC_MASTER)?;
        self.copy(&stream, PUBLIC_STREAM)?;
        debug!(slot = %slot, dir = %self.dir.display(), "public playlist retargeted");
        Ok(())
    }

    fn verify_non_empty(&self, slot: Slot, path: &Path) -> PublishResult<()> {
        match fs::metadata(path) {
            Ok(meta) if meta.len() > 0 => Ok(()),
            Ok(_) => Err(PublishError::NotReady {
                slot,
                reason: format!("{} is empty", path.display()),
            }),
            Err(_) => Err(PublishError::NotReady {
                slot,
                reason: format!("{} is missing", path.display()),
            }),
        }
    }

    fn copy(&self, from: &Path, public_name: &str) -> PublishResult<()> {
        let to = self.dir.join(public_name);
        fs::copy(from, &to)
            .map(|_| ())
            .map_err(|source| PublishError::Io { source, path: to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_slot(dir: &Path, slot: Slot, segments: usize, bytes: usize) {
        fs::write(
            dir.join(slot.master_playlist()),
            format!("#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=2000000\n{}\n", slot.stream_playlist()),
        )
        .unwrap();
        let mut playlist = String::from(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:0\n",
        );
        for index in 0..segments {
            playlist.push_str("#EXTINF:2.000000,\n");
            playlist.push_str(&format!("segment_{}_{:03}.ts\n", slot.label(), index));
        }
        fs::write(dir.join(slot.stream_playlist()), playlist).unwrap();
        for index in 0..segments {
            fs::write(
                dir.join(format!("segment_{}_{:03}.ts", slot.label(), index)),
                vec![0u8; bytes],
            )
            .unwrap();
        }
    }

    #[test]
    fn publishes_byte_identical_copies() {
        let dir = TempDir::new().unwrap();
        write_slot(dir.path(), Slot::A, 3, 6000);
        let publisher = SlotPublisher::new(dir.path());
        publisher.publish(Slot::A).unwrap();

        let public = fs::read(dir.path().join(PUBLIC_STREAM)).unwrap();
        let source = fs::read(dir.path().join(Slot::A.stream_playlist())).unwrap();
        assert_eq!(public, source);
        assert!(dir.path().join(PUBLIC_MASTER).exists());
    }

    #[test]
    fn refuses_missing_pair() {
        let dir = TempDir::new().unwrap();
        let publisher = SlotPublisher::new(dir.path());
        assert!(matches!(
            publisher.publish(Slot::A),
            Err(PublishError::NotReady { .. })
        ));
    }

    #[test]
    fn refuses_single_segment_playlist() {
        let dir = TempDir::new().unwrap();
        write_slot(dir.path(), Slot::B, 1, 6000);
        let publisher = SlotPublisher::new(dir.path());
        assert!(matches!(
            publisher.publish(Slot::B),
            Err(PublishError::NotReady { .. })
        ));
    }

    #[test]
    fn refuses_undersized_leading_segments() {
        let dir = TempDir::new().unwrap();
        write_slot(dir.path(), Slot::A, 3, 1000);
        let publisher = SlotPublisher::new(dir.path());
        assert!(matches!(
            publisher.publish(Slot::A),
            Err(PublishError::NotReady { .. })
        ));
    }

    #[test]
    fn two_of_three_leading_segments_suffice() {
        let dir = TempDir::new().unwrap();
        write_slot(dir.path(), Slot::A, 3, 6000);
        fs::write(dir.path().join("segment_A_002.ts"), vec![0u8; 100]).unwrap();
        let publisher = SlotPublisher::new(dir.path());
        assert!(publisher.publish(Slot::A).is_ok());
    }

    #[test]
    fn republish_overwrites_previous_target() {
        let dir = TempDir::new().unwrap();
        write_slot(dir.path(), Slot::A, 3, 6000);
        write_slot(dir.path(), Slot::B, 3, 6000);
        let publisher = SlotPublisher::new(dir.path());
        publisher.publish(Slot::A).unwrap();
        publisher.publish(Slot::B).unwrap();

        let public = fs::read_to_string(dir.path().join(PUBLIC_STREAM)).unwrap();
        assert!(public.contains("segment_B_000.ts"));
        assert!(!public.contains("segment_A_000.ts"));
    }
}
