use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::slot::Slot;

/// A segment smaller than this is a stub the transcoder has not finished
/// writing; it must never reach a viewer.
pub const MIN_SEGMENT_BYTES: u64 = 5000;

/// Minimum number of listed segments before a slot counts as playable.
pub const MIN_SEGMENTS: usize = 2;

/// Segment names belonging to `slot`, in playlist order. Returns an empty
/// list when the text is not (yet) a parsable media playlist.
pub fn segment_refs(playlist: &str, slot: Slot) -> Vec<String> {
    match m3u8_rs::parse_media_playlist_res(playlist.as_bytes()) {
        Ok(media) => media
            .segments
            .into_iter()
            .map(|segment| segment.uri)
            .filter(|uri| slot.owns_segment(uri))
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn non_empty_file(path: &Path) -> bool {
    fs::metadata(path).map(|meta| meta.len() > 0).unwrap_or(false)
}

fn segment_large_enough(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.len() > MIN_SEGMENT_BYTES)
        .unwrap_or(false)
}

/// One readiness observation: both slot playlists exist and are non-empty,
/// the stream playlist references at least two slot segments, and every
/// referenced segment is on disk above the size floor.
pub fn slot_is_playable(dir: &Path, slot: Slot) -> bool {
    let master = dir.join(slot.master_playlist());
    let stream = dir.join(slot.stream_playlist());
    if !non_empty_file(&master) || !non_empty_file(&stream) {
        return false;
    }
    let Ok(text) = fs::read_to_string(&stream) else {
        return false;
    };
    let refs = segment_refs(&text, slot);
    if refs.len() < MIN_SEGMENTS {
        return false;
    }
    refs.iter()
        .all(|name| segment_large_enough(&dir.join(name)))
}

/// Polls a slot's output directory until it is playable or the deadline
/// elapses. At the deadline one final check decides between ready and
/// timeout.
#[derive(Debug, Clone)]
pub struct ReadinessDetector {
    dir: PathBuf,
    slot: Slot,
    poll: Duration,
    deadline: Duration,
}

impl ReadinessDetector {
    pub fn new(dir: impl Into<PathBuf>, slot: Slot, poll: Duration, deadline: Duration) -> Self {
        Self {
            dir: dir.into(),
            slot,
            poll,
            deadline,
        }
    }

    pub async fn wait_playable(&self) -> bool {
        let deadline = Instant::now() + self.deadline;
        loop {
            if slot_is_playable(&self.dir, self.slot) {
                debug!(slot = %self.slot, dir = %self.dir.display(), "slot output playable");
                return true;
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(self.poll).await;
        }
        let last_chance = slot_is_playable(&self.dir, self.slot);
        if !last_chance {
            warn!(slot = %self.slot, dir = %self.dir.display(), "readiness deadline elapsed");
        }
        last_chance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MASTER: &str = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=2000000\nstream_A.m3u8\n";

    fn stream_playlist(slot: Slot, count: usize) -> String {
        let mut text = String::from(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:0\n",
        );
        for index in 0..count {
            text.push_str("#EXTINF:2.000000,\n");
            text.push_str(&format!("segment_{}_{:03}.ts\n", slot.label(), index));
        }
        text
    }

    fn write_slot(dir: &Path, slot: Slot, segments: usize, segment_bytes: usize) {
        fs::write(dir.join(slot.master_playlist()), MASTER).unwrap();
        fs::write(
            dir.join(slot.stream_playlist()),
            stream_playlist(slot, segments),
        )
        .unwrap();
        for index in 0..segments {
            fs::write(
                dir.join(format!("segment_{}_{:03}.ts", slot.label(), index)),
                vec![0u8; segment_bytes],
            )
            .unwrap();
        }
    }

    #[test]
    fn parses_live_playlists_without_endlist() {
        let refs = segment_refs(&stream_playlist(Slot::A, 3), Slot::A);
        assert_eq!(refs, vec!["segment_A_000.ts", "segment_A_001.ts", "segment_A_002.ts"]);
    }

    #[test]
    fn foreign_slot_segments_are_ignored() {
        let refs = segment_refs(&stream_playlist(Slot::B, 3), Slot::A);
        assert!(refs.is_empty());
    }

    #[test]
    fn playable_requires_two_large_segments() {
        let dir = TempDir::new().unwrap();
        write_slot(dir.path(), Slot::A, 3, 6000);
        assert!(slot_is_playable(dir.path(), Slot::A));
    }

    #[test]
    fn single_segment_is_not_playable() {
        let dir = TempDir::new().unwrap();
        write_slot(dir.path(), Slot::A, 1, 6000);
        assert!(!slot_is_playable(dir.path(), Slot::A));
    }

    #[test]
    fn undersized_segment_blocks_readiness() {
        let dir = TempDir::new().unwrap();
        write_slot(dir.path(), Slot::A, 3, 4000);
        assert!(!slot_is_playable(dir.path(), Slot::A));
    }

    #[test]
    fn missing_master_blocks_readiness() {
        let dir = TempDir::new().unwrap();
        write_slot(dir.path(), Slot::A, 3, 6000);
        fs::remove_file(dir.path().join(Slot::A.master_playlist())).unwrap();
        assert!(!slot_is_playable(dir.path(), Slot::A));
    }

    #[tokio::test]
    async fn detector_fires_once_output_lands() {
        let dir = TempDir::new().unwrap();
        let detector = ReadinessDetector::new(
            dir.path(),
            Slot::A,
            Duration::from_millis(10),
            Duration::from_millis(500),
        );
        let path = dir.path().to_path_buf();
        let writer = tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            write_slot(&path, Slot::A, 2, 6000);
        });
        assert!(detector.wait_playable().await);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn detector_times_out_on_empty_directory() {
        let dir = TempDir::new().unwrap();
        let detector = ReadinessDetector::new(
            dir.path(),
            Slot::B,
            Duration::from_millis(10),
            Duration::from_millis(60),
        );
        assert!(!detector.wait_playable().await);
    }
}
