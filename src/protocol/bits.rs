//! LSB-first bit handling for the payload phase, one bit per tick.

use embedded_hal::digital::PinState;

/// Collects sampled bits into bytes.
#[derive(Debug, Default)]
pub struct BitAssembler {
    byte: u8,
    bit: u8,
}

impl BitAssembler {
    pub const fn new() -> Self {
        Self { byte: 0, bit: 0 }
    }

    /// Shifts in one sampled bit; yields the byte once the eighth arrives.
    pub fn push(&mut self, level: PinState) -> Option<u8> {
        if level == PinState::High {
            self.byte |= 0x01 << self.bit;
        }
        self.bit += 1;

        if self.bit < 8 {
            None
        } else {
            let byte = self.byte;
            self.clear();
            Some(byte)
        }
    }

    /// True when no partial byte is pending.
    pub fn is_aligned(&self) -> bool {
        self.bit == 0
    }

    pub fn clear(&mut self) {
        self.byte = 0;
        self.bit = 0;
    }
}

/// Walks a byte buffer bit by bit.
#[derive(Debug, Default)]
pub struct BitCursor {
    pos: usize,
    bit: u8,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Emit {
    /// More bits follow this one.
    Bit(PinState),
    /// This was the final bit of the buffer.
    Last(PinState),
}

impl BitCursor {
    pub const fn new() -> Self {
        Self { pos: 0, bit: 0 }
    }

    /// Next bit of `data`, or `None` if the buffer is already exhausted.
    pub fn next_bit(&mut self, data: &[u8]) -> Option<Emit> {
        let byte = *data.get(self.pos)?;
        let level = PinState::from(byte & (0x01 << self.bit) != 0);
        self.bit += 1;

        if self.bit < 8 {
            return Some(Emit::Bit(level));
        }

        self.bit = 0;
        self.pos += 1;
        if self.pos >= data.len() {
            Some(Emit::Last(level))
        } else {
            Some(Emit::Bit(level))
        }
    }

    /// Back to the first bit, so the same payload can be sent again.
    pub fn rewind(&mut self) {
        self.pos = 0;
        self.bit = 0;
    }

    #[cfg(test)]
    fn position(&self) -> (usize, u8) {
        (self.pos, self.bit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PinState::{High, Low};

    #[test]
    fn assembler_is_lsb_first_test() {
        let mut asm = BitAssembler::new();
        let bits = [High, Low, Low, Low, Low, Low, High, Low];
        for level in &bits[..7] {
            assert_eq!(asm.push(*level), None);
            assert!(!asm.is_aligned());
        }
        assert_eq!(asm.push(bits[7]), Some(0x41));
        assert!(asm.is_aligned());
    }

    #[test]
    fn cursor_walks_buffer_test() {
        let mut cursor = BitCursor::new();
        let data = [0x41, 0x80];
        let mut seen = [Low; 16];
        for (i, slot) in seen.iter_mut().enumerate() {
            *slot = match cursor.next_bit(&data) {
                Some(Emit::Bit(level)) => { assert!(i < 15); level }
                Some(Emit::Last(level)) => { assert_eq!(i, 15); level }
                None => panic!("cursor ran dry at bit {}", i),
            };
        }
        assert_eq!(seen[0], High);
        assert_eq!(seen[6], High);
        assert_eq!(seen[15], High);
        assert_eq!(seen.iter().filter(|l| **l == High).count(), 3);
        assert_eq!(cursor.next_bit(&data), None);
    }

    #[test]
    fn cursor_rewind_test() {
        let mut cursor = BitCursor::new();
        let data = [0xff];
        cursor.next_bit(&data);
        cursor.next_bit(&data);
        assert_eq!(cursor.position(), (0, 2));
        cursor.rewind();
        assert_eq!(cursor.position(), (0, 0));
    }

    #[test]
    fn cursor_and_assembler_agree_test() {
        let data = *b"AC on";
        let mut cursor = BitCursor::new();
        let mut asm = BitAssembler::new();
        let mut out = [0u8; 5];
        let mut n = 0;
        loop {
            let (level, last) = match cursor.next_bit(&data) {
                Some(Emit::Bit(level)) => (level, false),
                Some(Emit::Last(level)) => (level, true),
                None => break,
            };
            if let Some(byte) = asm.push(level) {
                out[n] = byte;
                n += 1;
            }
            if last { break; }
        }
        assert_eq!(&out[..n], &data[..]);
    }
}
