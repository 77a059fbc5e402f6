//! Raw frame passed from a source to the detector.

/// A decoded video frame.
///
/// Pixel layout is owned by the capture side; the engine only inspects
/// dimensions and payload size for corruption checks.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    /// Minimum edge length below which a frame is treated as corrupt.
    pub const MIN_DIMENSION: u32 = 50;

    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// A frame is corrupt if it carries no pixel data or is implausibly
    /// small. Corrupt frames are skipped without counting as errors.
    pub fn is_corrupt(&self) -> bool {
        self.data.is_empty() || self.width < Self::MIN_DIMENSION || self.height < Self::MIN_DIMENSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_frame_is_corrupt() {
        assert!(Frame::new(640, 480, vec![]).is_corrupt());
    }

    #[test]
    fn test_tiny_frame_is_corrupt() {
        assert!(Frame::new(32, 480, vec![0u8; 32 * 480]).is_corrupt());
        assert!(Frame::new(640, 10, vec![0u8; 640 * 10]).is_corrupt());
    }

    #[test]
    fn test_normal_frame_is_ok() {
        assert!(!Frame::new(640, 480, vec![0u8; 640 * 480 * 3]).is_corrupt());
    }
}
