use bytes::{Buf, BufMut, BytesMut};

use super::{COUNT_SIZE, ELEMENT_SIZE};

#[derive(PartialEq, Eq)]
pub enum FrameError {
    /// Buffer cannot hold the element count.
    TooShort,
    /// Buffer length does not match the element count.
    SizeMismatch { expected: usize, actual: usize },
}

impl std::error::Error for FrameError {}

impl std::fmt::Debug for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::TooShort => write!(f, "TooShort"),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "SizeMismatch({}, {})", expected, actual)
            }
        }
    }
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::TooShort => write!(f, "frame too short"),
            Self::SizeMismatch { expected, actual } => write!(
                f,
                "frame size mismatch: expected {} bytes, got {}",
                expected, actual
            ),
        }
    }
}

/// Internal channel frame.
///
/// A frame is nothing more than an ordered list of doubles. On the wire it is
/// prefixed by the element count as a big-endian `u32`, followed by every
/// element as a big-endian `f64`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame(Vec<f64>);

impl Frame {
    pub fn new(values: impl Into<Vec<f64>>) -> Self {
        Self(values.into())
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Test whether the frame carries exactly these values.
    #[inline]
    pub fn is(&self, values: &[f64]) -> bool {
        self.0 == values
    }

    /// Test whether the frame is a triple of one repeated value.
    pub fn is_uniform_triple(&self) -> Option<f64> {
        match self.0[..] {
            [a, b, c] if a == b && b == c => Some(a),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = BytesMut::with_capacity(COUNT_SIZE + self.0.len() * ELEMENT_SIZE);

        buffer.put_u32(self.0.len() as u32);
        for value in &self.0 {
            buffer.put_f64(*value);
        }

        buffer.to_vec()
    }

    #[inline]
    pub fn into_values(self) -> Vec<f64> {
        self.0
    }
}

impl TryFrom<&[u8]> for Frame {
    type Error = FrameError;

    fn try_from(mut buffer: &[u8]) -> std::result::Result<Self, Self::Error> {
        if buffer.len() < COUNT_SIZE {
            Err(FrameError::TooShort)?
        }

        let count = buffer.get_u32() as usize;

        // Anything but an exact fit is noise, never a truncated frame.
        let expected = count.saturating_mul(ELEMENT_SIZE);
        if buffer.remaining() != expected {
            Err(FrameError::SizeMismatch {
                expected: COUNT_SIZE.saturating_add(expected),
                actual: COUNT_SIZE + buffer.remaining(),
            })?
        }

        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(buffer.get_f64());
        }

        Ok(Self(values))
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({})",
            self.0
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout() {
        let bytes = Frame::new(vec![1.0, -2.5]).to_bytes();

        assert_eq!(bytes.len(), 4 + 2 * 8);
        assert_eq!(bytes[0..4], [0, 0, 0, 2]);
        assert_eq!(bytes[4..12], 1.0f64.to_be_bytes());
        assert_eq!(bytes[12..20], (-2.5f64).to_be_bytes());
    }

    #[test]
    fn frame_empty() {
        let bytes = Frame::default().to_bytes();

        assert_eq!(bytes, vec![0, 0, 0, 0]);
        assert!(Frame::try_from(&bytes[..]).unwrap().is_empty());
    }

    #[test]
    fn frame_accepts_any_bit_pattern() {
        let mut bytes = vec![0u8, 0, 0, 3];
        bytes.extend_from_slice(&f64::NAN.to_be_bytes());
        bytes.extend_from_slice(&f64::INFINITY.to_be_bytes());
        bytes.extend_from_slice(&[0xff; 8]);

        let frame = Frame::try_from(&bytes[..]).unwrap();

        assert_eq!(frame.len(), 3);
        assert!(frame.values()[0].is_nan());
        assert_eq!(frame.values()[1], f64::INFINITY);
    }

    #[test]
    fn frame_too_short() {
        assert_eq!(Frame::try_from(&[0u8; 0][..]), Err(FrameError::TooShort));
        assert_eq!(Frame::try_from(&[0u8, 0, 1][..]), Err(FrameError::TooShort));
    }

    #[test]
    fn frame_trailing_bytes() {
        let mut bytes = Frame::new(vec![99.0, 99.0, 99.0]).to_bytes();
        bytes.push(0);

        assert_eq!(
            Frame::try_from(&bytes[..]),
            Err(FrameError::SizeMismatch {
                expected: 28,
                actual: 29
            })
        );
    }

    #[test]
    fn frame_truncated() {
        let bytes = Frame::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).to_bytes();

        assert!(matches!(
            Frame::try_from(&bytes[..bytes.len() - 8]),
            Err(FrameError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn frame_huge_count() {
        let bytes = [0xffu8, 0xff, 0xff, 0xff, 0, 0, 0, 0, 0, 0, 0, 0];

        assert!(matches!(
            Frame::try_from(&bytes[..]),
            Err(FrameError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn frame_uniform_triple() {
        assert_eq!(Frame::new(vec![2.0, 2.0, 2.0]).is_uniform_triple(), Some(2.0));
        assert_eq!(Frame::new(vec![2.0, 2.0, 1.0]).is_uniform_triple(), None);
        assert_eq!(Frame::new(vec![2.0; 6]).is_uniform_triple(), None);
    }

    #[test]
    fn frame_display() {
        assert_eq!(Frame::new(vec![99.0, 99.0, 0.0]).to_string(), "(99, 99, 0)");
    }
}
