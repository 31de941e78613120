/// Smallest unrecognised body still accepted as a probable video.
const MIN_UNKNOWN_VIDEO_BYTES: usize = 1024;
const MAX_BOXES_CHECKED: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoContainer {
    Mp4,
    QuickTime,
    WebM,
    Avi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoVerdict {
    Valid(VideoContainer),
    /// No known signature, but large enough to be real media.
    ProbablyValid,
    Invalid(&'static str),
}

impl VideoVerdict {
    pub fn is_acceptable(self) -> bool {
        !matches!(self, VideoVerdict::Invalid(_))
    }
}

/// Sanity check a downloaded media body against known container signatures.
pub fn inspect_video(content: &[u8]) -> VideoVerdict {
    if content.len() < 12 {
        return VideoVerdict::Invalid("too small");
    }
    if &content[4..8] == b"ftyp" {
        let brand = &content[8..12];
        let container = if brand == b"qt  " || brand == b"mov " {
            VideoContainer::QuickTime
        } else {
            VideoContainer::Mp4
        };
        return if walk_boxes(content) {
            VideoVerdict::Valid(container)
        } else {
            VideoVerdict::Invalid("broken box structure")
        };
    }
    if content.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return VideoVerdict::Valid(VideoContainer::WebM);
    }
    if &content[0..4] == b"RIFF" && &content[8..12] == b"AVI " {
        return VideoVerdict::Valid(VideoContainer::Avi);
    }
    if content.len() > MIN_UNKNOWN_VIDEO_BYTES {
        VideoVerdict::ProbablyValid
    } else {
        VideoVerdict::Invalid("unrecognised and too small")
    }
}

/// Walk the leading ISO-BMFF boxes; at least one known box with sane sizes.
fn walk_boxes(content: &[u8]) -> bool {
    if content.len() < 32 {
        return false;
    }
    let mut offset = 0usize;
    let mut known = 0usize;
    let mut visited = 0usize;
    while offset + 8 <= content.len() && visited < MAX_BOXES_CHECKED {
        let size = u32::from_be_bytes([
            content[offset],
            content[offset + 1],
            content[offset + 2],
            content[offset + 3],
        ]) as usize;
        let kind = &content[offset + 4..offset + 8];
        if matches!(kind, b"ftyp" | b"moov" | b"mdat" | b"free" | b"skip" | b"wide") {
            known += 1;
        }
        visited += 1;
        match size {
            // Extends to end of file, or a 64-bit size; stop walking.
            0 | 1 => break,
            s if s < 8 || offset + s > content.len() => return false,
            s => offset += s,
        }
    }
    known > 0
}
