use super::TranscriptionError;

/// Container formats accepted for transcription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaContainer {
    Mp4,
    WebM,
    Flv,
}

impl MediaContainer {
    /// File extension used for the temporary upload
    pub fn extension(&self) -> &'static str {
        match self {
            MediaContainer::Mp4 => "mp4",
            MediaContainer::WebM => "webm",
            MediaContainer::Flv => "flv",
        }
    }
}

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// Identify the container from its leading bytes
pub fn sniff_container(bytes: &[u8]) -> Option<MediaContainer> {
    if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
        Some(MediaContainer::Mp4)
    } else if bytes.starts_with(&EBML_MAGIC) {
        Some(MediaContainer::WebM)
    } else if bytes.starts_with(b"FLV") {
        Some(MediaContainer::Flv)
    } else {
        None
    }
}

/// Sizes up to and including `limit` pass
pub fn validate_size(size: u64, limit: u64) -> Result<(), TranscriptionError> {
    if size > limit {
        return Err(TranscriptionError::TooLarge { size, limit });
    }
    Ok(())
}

/// Check size and container of a downloaded media buffer
pub fn validate_media(bytes: &[u8], limit: u64) -> Result<MediaContainer, TranscriptionError> {
    validate_size(bytes.len() as u64, limit)?;
    sniff_container(bytes).ok_or(TranscriptionError::UnsupportedFormat)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: u64 = 25 * 1024 * 1024;

    fn mp4_header() -> Vec<u8> {
        vec![0x00, 0x00, 0x00, 0x20, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm']
    }

    #[test]
    fn test_sniff_container() {
        assert_eq!(sniff_container(&mp4_header()), Some(MediaContainer::Mp4));
        assert_eq!(
            sniff_container(&[0x1A, 0x45, 0xDF, 0xA3, 0x01]),
            Some(MediaContainer::WebM)
        );
        assert_eq!(sniff_container(b"FLV\x01\x05"), Some(MediaContainer::Flv));
        assert_eq!(sniff_container(b"<html>"), None);
        assert_eq!(sniff_container(b"ftyp"), None);
        assert_eq!(sniff_container(&[]), None);
    }

    #[test]
    fn test_size_boundary() {
        let mut exact = vec![0u8; LIMIT as usize];
        exact[..12].copy_from_slice(&mp4_header());
        assert_eq!(validate_media(&exact, LIMIT).unwrap(), MediaContainer::Mp4);

        exact.push(0);
        match validate_media(&exact, LIMIT) {
            Err(TranscriptionError::TooLarge { size, limit }) => {
                assert_eq!(size, LIMIT + 1);
                assert_eq!(limit, LIMIT);
            }
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_container_rejected() {
        assert!(matches!(
            validate_media(b"GIF89a....", LIMIT),
            Err(TranscriptionError::UnsupportedFormat)
        ));
    }
}
