use std::fmt;

use serde::Serialize;

/// One of the two parallel transcoder outputs inside a channel directory.
/// Exactly one slot is published at a time; the other is free for preloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Slot::A => "A",
            Slot::B => "B",
        }
    }

    pub fn stream_playlist(self) -> String {
        format!("stream_{}.m3u8", self.label())
    }

    pub fn master_playlist(self) -> String {
        format!("master_{}.m3u8", self.label())
    }

    pub fn segment_prefix(self) -> String {
        format!("segment_{}_", self.label())
    }

    /// ffmpeg `-hls_segment_filename` template for this slot.
    pub fn segment_template(self) -> String {
        format!("segment_{}_%03d.ts", self.label())
    }

    /// Whether a playlist entry names a segment belonging to this slot.
    pub fn owns_segment(self, name: &str) -> bool {
        let prefix = self.segment_prefix();
        let Some(rest) = name.strip_prefix(&prefix) else {
            return false;
        };
        let Some(digits) = rest.strip_suffix(".ts") else {
            return false;
        };
        !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_cover_both_sides() {
        assert_eq!(Slot::A.other(), Slot::B);
        assert_eq!(Slot::B.other(), Slot::A);
        assert_ne!(Slot::A, Slot::A.other());
    }

    #[test]
    fn filenames_parameterize_on_slot() {
        assert_eq!(Slot::A.stream_playlist(), "stream_A.m3u8");
        assert_eq!(Slot::B.master_playlist(), "master_B.m3u8");
        assert_eq!(Slot::B.segment_template(), "segment_B_%03d.ts");
    }

    #[test]
    fn segment_ownership() {
        assert!(Slot::A.owns_segment("segment_A_004.ts"));
        assert!(Slot::A.owns_segment("segment_A_12345.ts"));
        assert!(!Slot::A.owns_segment("segment_B_004.ts"));
        assert!(!Slot::A.owns_segment("segment_A_.ts"));
        assert!(!Slot::A.owns_segment("segment_A_00x.ts"));
        assert!(!Slot::A.owns_segment("segment_A_004.ts.tmp"));
    }
}
