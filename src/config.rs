//! Link-wide constants.
//!
//! Both ends of a link must agree on the tick rate. Nothing here is negotiated
//! on the wire.

/// Rate at which the shared timer invokes the tick handlers. This is the bit
/// rate of every link driven from that timer.
pub const TICK_FREQ_HZ: f32 = 5555.555;

/// Nominal period between two ticks, in microseconds.
pub const TICK_PERIOD_US: u32 = 180;

/// Default capacity of each RX/TX buffer, in bytes.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Number of symbols exchanged before the payload.
pub const PREAMBLE_LEN: usize = 5;

/// Number of symbols exchanged after the payload.
pub const POSTAMBLE_LEN: usize = 4;

/// Byte value that may not appear in a payload.
pub const TERMINATOR: u8 = 0x00;

/// Largest payload a buffer of capacity `n` can carry: one slot for the
/// checksum, one kept back for the terminator.
pub const fn max_payload(n: usize) -> usize {
    n.saturating_sub(2)
}
