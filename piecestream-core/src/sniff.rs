//! Magic-byte detection for archive descriptions and delivered stream data.
//!
//! Detection only labels data so that a consumer can pick a handler for a
//! port; no container is parsed beyond its first bytes.

use std::fmt;

/// Leading bytes of a bencoded description whose first key is `announce`.
pub const DESCRIPTION_MAGIC: &[u8] = b"d8:announce";

const DESCRIPTION_ALTERNATE_MAGIC: [&[u8]; 2] = [b"d13:announce-list", b"d4:info"];

/// Type of stream data recognised from its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// MPEG-4 Part 14 container
    Mp4,
    /// QuickTime movie container
    QuickTime,
    /// Matroska container
    Matroska,
    /// WebM flavour of Matroska
    WebM,
    /// Audio Video Interleave container
    Avi,
    /// Waveform audio
    Wav,
    /// Ogg bitstream
    Ogg,
    /// Free Lossless Audio Codec
    Flac,
    /// MPEG audio layer III, with or without ID3 tag
    Mp3,
    /// MPEG transport stream
    MpegTs,
    Png,
    Jpeg,
    /// A nested archive description
    ArchiveDescription,
}

impl ContentType {
    /// Returns the MIME type the consumer should negotiate.
    pub fn mime_type(self) -> &'static str {
        match self {
            ContentType::Mp4 => "video/mp4",
            ContentType::QuickTime => "video/quicktime",
            ContentType::Matroska => "video/x-matroska",
            ContentType::WebM => "video/webm",
            ContentType::Avi => "video/x-msvideo",
            ContentType::Wav => "audio/x-wav",
            ContentType::Ogg => "application/ogg",
            ContentType::Flac => "audio/x-flac",
            ContentType::Mp3 => "audio/mpeg",
            ContentType::MpegTs => "video/mpegts",
            ContentType::Png => "image/png",
            ContentType::Jpeg => "image/jpeg",
            ContentType::ArchiveDescription => "application/x-bittorrent",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Checks whether bytes start like a bencoded archive description.
pub fn is_archive_description(data: &[u8]) -> bool {
    data.starts_with(DESCRIPTION_MAGIC)
        || DESCRIPTION_ALTERNATE_MAGIC
            .iter()
            .any(|magic| data.starts_with(magic))
}

/// Detects the content type from the first bytes of a stream.
///
/// Returns `None` when the data is too short or matches no known signature.
pub fn detect_content_type(data: &[u8]) -> Option<ContentType> {
    if is_archive_description(data) {
        return Some(ContentType::ArchiveDescription);
    }

    // ISO base media: size + box type
    if data.len() >= 12 {
        let box_type = &data[4..8];
        if matches!(box_type, b"ftyp" | b"moov" | b"mdat" | b"free" | b"wide") {
            if data[8..12].starts_with(b"qt") {
                return Some(ContentType::QuickTime);
            }
            return Some(ContentType::Mp4);
        }
    }

    if data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        let header = &data[..data.len().min(64)];
        if header.windows(4).any(|window| window == b"webm") {
            return Some(ContentType::WebM);
        }
        return Some(ContentType::Matroska);
    }

    if data.len() >= 12 && data.starts_with(b"RIFF") {
        return match &data[8..12] {
            b"AVI " => Some(ContentType::Avi),
            b"WAVE" => Some(ContentType::Wav),
            _ => None,
        };
    }

    if data.starts_with(b"OggS") {
        return Some(ContentType::Ogg);
    }
    if data.starts_with(b"fLaC") {
        return Some(ContentType::Flac);
    }
    if data.starts_with(b"ID3") || (data.len() >= 2 && data[0] == 0xFF && data[1] & 0xE0 == 0xE0)
    {
        return Some(ContentType::Mp3);
    }
    // Transport stream: sync byte repeated every 188 bytes
    if data.len() > 188 && data[0] == 0x47 && data[188] == 0x47 {
        return Some(ContentType::MpegTs);
    }
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some(ContentType::Png);
    }
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(ContentType::Jpeg);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_description_magic() {
        assert!(is_archive_description(b"d8:announce35:udp://tracker"));
        assert!(is_archive_description(b"d4:infod6:length"));
        assert!(!is_archive_description(b"d3:foo"));
        assert_eq!(
            detect_content_type(b"d8:announce"),
            Some(ContentType::ArchiveDescription)
        );
    }

    #[test]
    fn test_detects_mp4_and_quicktime() {
        let mp4 = b"\x00\x00\x00\x20ftypisom\x00\x00\x02\x00";
        let mov = b"\x00\x00\x00\x14ftypqt  \x00\x00\x00\x00";
        assert_eq!(detect_content_type(mp4), Some(ContentType::Mp4));
        assert_eq!(detect_content_type(mov), Some(ContentType::QuickTime));
    }

    #[test]
    fn test_detects_matroska_family() {
        let mut webm = vec![0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x82, 0x84];
        webm.extend_from_slice(b"webm");
        assert_eq!(detect_content_type(&webm), Some(ContentType::WebM));

        let mut mkv = vec![0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x82, 0x88];
        mkv.extend_from_slice(b"matroska");
        assert_eq!(detect_content_type(&mkv), Some(ContentType::Matroska));
    }

    #[test]
    fn test_detects_riff_variants() {
        assert_eq!(
            detect_content_type(b"RIFF\x00\x00\x00\x00AVI LIST"),
            Some(ContentType::Avi)
        );
        assert_eq!(
            detect_content_type(b"RIFF\x00\x00\x00\x00WAVEfmt "),
            Some(ContentType::Wav)
        );
        assert_eq!(detect_content_type(b"RIFF\x00\x00\x00\x00XXXX"), None);
    }

    #[test]
    fn test_detects_transport_stream() {
        let mut ts = vec![0u8; 189];
        ts[0] = 0x47;
        ts[188] = 0x47;
        assert_eq!(detect_content_type(&ts), Some(ContentType::MpegTs));
    }

    #[test]
    fn test_unknown_data() {
        assert_eq!(detect_content_type(b""), None);
        assert_eq!(detect_content_type(b"plain text file"), None);
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(ContentType::Matroska.mime_type(), "video/x-matroska");
        assert_eq!(ContentType::Flac.to_string(), "audio/x-flac");
    }
}
