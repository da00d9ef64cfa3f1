use super::frame::Frame;

#[derive(Debug, PartialEq, Eq)]
pub struct EncodingError;

pub trait Encodable {
    fn encode<'a>(&self, into: &'a mut [u8]) -> Result<&'a [u8], EncodingError>;
}

impl<'f> Encodable for Frame<'f> {
    /// Writes payload then checksum to the front of `into`, returning the
    /// written part.
    fn encode<'a>(&self, into: &'a mut [u8]) -> Result<&'a [u8], EncodingError> {
        let len = self.len();
        if into.len() < len { return Err(EncodingError); }

        into[..self.data.len()].copy_from_slice(self.data);
        into[len - 1] = self.checksum();
        Ok(&into[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_encode_test() {
        let mut buf = [0u8; 8];
        let frame = Frame::new(b"hello");
        assert_eq!(frame.encode(&mut buf), Ok(&b"hello\x62"[..]));
    }

    #[test]
    fn frame_encode_too_small_test() {
        let mut buf = [0u8; 5];
        assert_eq!(Frame::new(b"hello").encode(&mut buf), Err(EncodingError));
    }
}
