use embedded_hal::digital::PinState;

use crate::config::{POSTAMBLE_LEN, PREAMBLE_LEN};

/// Position of a channel in the handshake.
///
/// `Ready` is reachable from every error and completion state, so no state
/// is terminal.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    NotInit = 0x00,
    Ready = 0x01,

    RxStart = 0x10,
    RxChar = 0x11,
    RxAck = 0x12,
    RxChecksum = 0x13,
    RxAbort = 0x14,
    RxErr = 0x15,
    RxDone = 0x16,

    TxStart = 0x20,
    TxChar = 0x21,
    TxEnd = 0x22,
    TxAck = 0x23,
    TxErr = 0x24,
    TxDone = 0x25,
}

impl From<u8> for State {
    fn from(byte: u8) -> Self {
        match byte {
            0x01 => State::Ready,

            0x10 => State::RxStart,
            0x11 => State::RxChar,
            0x12 => State::RxAck,
            0x13 => State::RxChecksum,
            0x14 => State::RxAbort,
            0x15 => State::RxErr,
            0x16 => State::RxDone,

            0x20 => State::TxStart,
            0x21 => State::TxChar,
            0x22 => State::TxEnd,
            0x23 => State::TxAck,
            0x24 => State::TxErr,
            0x25 => State::TxDone,

            _ => State::NotInit,
        }
    }
}

impl State {
    pub fn is_receiving(self) -> bool {
        (self as u8) & 0xf0 == 0x10
    }

    pub fn is_transmitting(self) -> bool {
        (self as u8) & 0xf0 == 0x20
    }
}

// Preamble and postamble symbol tables, indexed by ticks spent in the state.
//
// "Send" is what the passive (receiving) side drives, "expect" is what it
// should observe from the active side. The active side drives the expect
// column and waits for the send column to come back one tick later.

pub const PREAMBLE_SEND: [PinState; PREAMBLE_LEN] = [
    PinState::High, PinState::Low, PinState::High, PinState::Low, PinState::High,
];
pub const PREAMBLE_EXPECT: [PinState; PREAMBLE_LEN] = [
    PinState::Low, PinState::High, PinState::Low, PinState::High, PinState::Low,
];

pub const POSTAMBLE_SEND: [PinState; POSTAMBLE_LEN] = [
    PinState::Low, PinState::High, PinState::Low, PinState::High,
];
pub const POSTAMBLE_EXPECT: [PinState; POSTAMBLE_LEN] = [
    PinState::High, PinState::Low, PinState::High, PinState::Low,
];

/// Symbol the passive side keeps on its data line while it listens to the
/// payload.
pub const LISTENING: PinState = PREAMBLE_SEND[PREAMBLE_LEN - 1];

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [State; 15] = [
        State::NotInit, State::Ready,
        State::RxStart, State::RxChar, State::RxAck, State::RxChecksum,
        State::RxAbort, State::RxErr, State::RxDone,
        State::TxStart, State::TxChar, State::TxEnd, State::TxAck,
        State::TxErr, State::TxDone,
    ];

    #[test]
    fn state_from_byte_test() {
        for state in ALL.iter() {
            assert_eq!(State::from(*state as u8), *state);
        }
        assert_eq!(State::from(0xff), State::NotInit);
    }

    #[test]
    fn exactly_one_activity_test() {
        for state in ALL.iter().filter(|s| **s != State::NotInit) {
            let held = [*state == State::Ready, state.is_receiving(), state.is_transmitting()];
            assert_eq!(held.iter().filter(|b| **b).count(), 1, "{:?}", state);
        }
    }

    #[test]
    fn symbol_tables_are_complementary_test() {
        for i in 0..PREAMBLE_LEN {
            assert_eq!(PREAMBLE_SEND[i], !PREAMBLE_EXPECT[i]);
        }
        for i in 0..POSTAMBLE_LEN {
            assert_eq!(POSTAMBLE_SEND[i], !POSTAMBLE_EXPECT[i]);
        }
    }

    #[test]
    fn symbol_tables_alternate_test() {
        for w in PREAMBLE_EXPECT.windows(2).chain(POSTAMBLE_EXPECT.windows(2)) {
            assert_ne!(w[0], w[1]);
        }
    }
}
