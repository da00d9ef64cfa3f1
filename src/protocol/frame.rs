/// Running XOR of every byte. Catches an odd number of flipped bits in any
/// one bit position; an even number of flips in the same position cancels
/// out and goes unnoticed.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ *b)
}

/// Payload plus the trailing checksum byte that follows it on the wire.
#[derive(Debug, Eq, PartialEq)]
pub struct Frame<'a> {
    pub data: &'a [u8],
    checksum: u8,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Nothing beyond the checksum byte (or not even that) was received.
    TooShort,
    ChecksumMismatch { received: u8, calculated: u8 },
}

impl<'a> Frame<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, checksum: checksum(data) }
    }

    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Bytes this frame occupies on the wire.
    pub fn len(&self) -> usize {
        self.data.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Splits a received byte sequence into payload and trailing checksum and
    /// checks one against the other.
    pub fn verify(received: &'a [u8]) -> Result<Self, FrameError> {
        let (received_checksum, data) = match received.split_last() {
            Some((last, data)) if !data.is_empty() => (*last, data),
            _ => return Err(FrameError::TooShort),
        };

        let frame = Self::new(data);
        if frame.checksum == received_checksum {
            Ok(frame)
        } else {
            Err(FrameError::ChecksumMismatch {
                received: received_checksum,
                calculated: frame.checksum,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_test() {
        assert_eq!(0x00, checksum(&[]));
        assert_eq!(0x68, checksum(b"h"));
        assert_eq!(0x62, checksum(b"hello"));
        assert_eq!(0x00, checksum(b"aa"));
    }

    #[test]
    fn verify_test() {
        assert_eq!(
            Ok(Frame { data: b"hello", checksum: 0x62 }),
            Frame::verify(b"hello\x62")
        );
    }

    #[test]
    fn verify_rejects_bad_checksum_test() {
        assert_eq!(
            Err(FrameError::ChecksumMismatch { received: 0x63, calculated: 0x62 }),
            Frame::verify(b"hello\x63")
        );
    }

    #[test]
    fn verify_rejects_short_input_test() {
        assert_eq!(Err(FrameError::TooShort), Frame::verify(&[]));
        assert_eq!(Err(FrameError::TooShort), Frame::verify(&[0x00]));
    }

    #[test]
    fn odd_flips_are_detected_test() {
        let mut wire = [b'h', b'e', b'l', b'l', b'o', 0x62];
        wire[1] ^= 0x04;
        assert!(Frame::verify(&wire).is_err());

        wire[2] ^= 0x10;
        wire[3] ^= 0x01;
        assert!(Frame::verify(&wire).is_err());
    }

    // Two flips in the same bit position cancel out. This is a property of the
    // parity byte, not something the link tries to catch.
    #[test]
    fn even_flips_in_one_position_go_unnoticed_test() {
        let mut wire = [b'h', b'e', b'l', b'l', b'o', 0x62];
        wire[1] ^= 0x08;
        wire[4] ^= 0x08;
        assert!(Frame::verify(&wire).is_ok());
    }
}
