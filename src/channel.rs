//! One physical link and the state machine that drives it.
//!
//! The tick handler advances the machine by exactly one step per bit period.
//! Application code talks to it through [`Channel::put`], [`Channel::ready`]
//! and [`Channel::get`]; see `exchange` for how the buffers change hands.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use critical_section::Mutex;
use embedded_hal::digital::PinState;
use heapless::Vec;
use log::{debug, error, trace, warn};

use crate::config::{max_payload, DEFAULT_CAPACITY, POSTAMBLE_LEN, PREAMBLE_LEN, TERMINATOR};
use crate::exchange::{Exchange, LinkSide};
use crate::interface::{LinkPins, PinError, Sample};
use crate::protocol::bits::{BitAssembler, BitCursor, Emit};
use crate::protocol::types::{
    State, LISTENING, POSTAMBLE_EXPECT, POSTAMBLE_SEND, PREAMBLE_EXPECT, PREAMBLE_SEND,
};
use crate::protocol::{Frame, FrameError};
use crate::registry::{Tick, TickRegistry, TimerId};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PutError {
    NotInitialized,
    Empty,
    /// Payload plus checksum would not fit the TX buffer.
    TooLong,
    /// Payload contains the terminator byte.
    ContainsTerminator,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BeginError {
    AlreadyInitialized,
    RegistryFull,
    Pin(PinError),
}

/// State only the tick handler touches.
struct Engine<P> {
    pins: P,
    link: LinkSide,
    time_in_state: u32,
    rx_bits: BitAssembler,
    tx_bits: BitCursor,
}

pub struct Channel<P, const N: usize = DEFAULT_CAPACITY> {
    timer: TimerId,
    engine: Mutex<RefCell<Engine<P>>>,
    state: AtomicU8,
    initialized: AtomicBool,
    exchange: Exchange<N>,
}

impl<P: LinkPins, const N: usize> Channel<P, N> {
    pub const fn new(pins: P, timer: TimerId) -> Self {
        Channel {
            timer,
            engine: Mutex::new(RefCell::new(Engine {
                pins,
                link: LinkSide::new(),
                time_in_state: 0,
                rx_bits: BitAssembler::new(),
                tx_bits: BitCursor::new(),
            })),
            state: AtomicU8::new(State::NotInit as u8),
            initialized: AtomicBool::new(false),
            exchange: Exchange::new(),
        }
    }

    /// Drives both outputs low, clears the buffers and attaches the channel
    /// to its timer. A second call, or a call with a full registry, is logged
    /// and leaves the pins untouched.
    pub fn begin<'a, const M: usize>(&'a self, registry: &TickRegistry<'a, M>) -> Result<(), BeginError>
    where
        P: Send + 'a,
    {
        critical_section::with(|cs| {
            if self.initialized.load(Ordering::Acquire) {
                error!("channel on timer {} already initialized", self.timer.0);
                return Err(BeginError::AlreadyInitialized);
            }
            if registry.is_full() {
                error!("no tick registry slot for channel on timer {}", self.timer.0);
                return Err(BeginError::RegistryFull);
            }

            {
                let mut engine = self.engine.borrow_ref_mut(cs);
                let engine = &mut *engine;
                engine.pins.release().map_err(BeginError::Pin)?;
                engine.rx_bits.clear();
                engine.tx_bits.rewind();
                engine.time_in_state = 0;
                self.exchange.with_rx(&mut engine.link, |buf| buf.clear());
            }

            registry.register(self.timer, self).map_err(|_| BeginError::RegistryFull)?;

            self.initialized.store(true, Ordering::Release);
            self.state.store(State::Ready as u8, Ordering::Release);
            debug!("channel on timer {} ready, {} byte buffers", self.timer.0, N);
            Ok(())
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn state(&self) -> State {
        State::from(self.state.load(Ordering::Acquire))
    }

    /// A staged message is waiting for, or retrying, transmission.
    pub fn tx_pending(&self) -> bool {
        self.exchange.tx_ready()
    }

    /// The tick handler currently holds the TX buffer.
    pub fn sending(&self) -> bool {
        self.exchange.tx_in_progress()
    }

    /// Stages `payload` for the next transmission opportunity, replacing any
    /// message still waiting. If a send is in flight this spins until the
    /// tick handler has finished or abandoned it.
    pub fn try_put(&self, payload: &[u8]) -> Result<(), PutError> {
        if !self.is_initialized() {
            return Err(PutError::NotInitialized);
        }
        let frame = Frame::new(payload);
        if frame.is_empty() {
            return Err(PutError::Empty);
        }
        if payload.len() > max_payload(N) {
            return Err(PutError::TooLong);
        }
        if payload.contains(&TERMINATOR) {
            return Err(PutError::ContainsTerminator);
        }

        self.exchange.stage(&frame).map_err(|_| PutError::TooLong)?;
        debug!("staged {} byte message", payload.len());
        Ok(())
    }

    pub fn put(&self, payload: &[u8]) -> bool {
        match self.try_put(payload) {
            Ok(()) => true,
            Err(e) => {
                debug!("put rejected: {:?}", e);
                false
            }
        }
    }

    /// A verified message is waiting.
    pub fn ready(&self) -> bool {
        self.state() == State::RxDone && self.exchange.rx_published()
    }

    /// Takes the waiting message, or returns an empty vector if there is none.
    pub fn get(&self) -> Vec<u8, N> {
        if self.state() != State::RxDone {
            return Vec::new();
        }
        self.exchange
            .take_rx(|frame| Some(Vec::from_slice(payload_of(frame)).unwrap_or_default()))
            .unwrap_or_default()
    }

    /// Copies the waiting message into `out` and returns its length. Leaves
    /// the message in place if `out` is too small.
    pub fn get_into(&self, out: &mut [u8]) -> Option<usize> {
        if self.state() != State::RxDone {
            return None;
        }
        self.exchange.take_rx(|frame| {
            let payload = payload_of(frame);
            let dest = out.get_mut(..payload.len())?;
            dest.copy_from_slice(payload);
            Some(payload.len())
        })
    }

    fn go(&self, engine: &mut Engine<P>, next: State) {
        trace!("{:?} -> {:?}", self.state(), next);
        engine.time_in_state = 0;
        self.state.store(next as u8, Ordering::Release);
    }

    fn clear_rx(&self, engine: &mut Engine<P>) {
        engine.rx_bits.clear();
        self.exchange.with_rx(&mut engine.link, |buf| buf.clear());
    }

    fn rx_finish(&self, engine: &mut Engine<P>) -> Result<(), PinError> {
        self.clear_rx(engine);
        self.exchange.release_tx(&mut engine.link, false);
        self.go(engine, State::Ready);
        engine.pins.release()
    }

    /// Gives up on the current send; the message stays staged.
    fn tx_abort(&self, engine: &mut Engine<P>) -> Result<(), PinError> {
        engine.tx_bits.rewind();
        self.exchange.release_tx(&mut engine.link, false);
        self.go(engine, State::Ready);
        engine.pins.release()
    }

    fn tx_done(&self, engine: &mut Engine<P>) -> Result<(), PinError> {
        engine.tx_bits.rewind();
        self.exchange.release_tx(&mut engine.link, true);
        self.go(engine, State::Ready);
        engine.pins.release()
    }

    /// Pin failure: drop whatever exchange was running, except a message
    /// already handed to the application.
    fn recover(&self, engine: &mut Engine<P>, e: PinError) {
        let state = self.state();
        warn!("pin fault in {:?} on timer {}: {:?}", state, self.timer.0, e);

        engine.tx_bits.rewind();
        self.exchange.release_tx(&mut engine.link, false);
        if state != State::RxDone {
            self.clear_rx(engine);
            self.go(engine, State::Ready);
        }
        if let Err(e) = engine.pins.release() {
            warn!("could not release pins on timer {}: {:?}", self.timer.0, e);
        }
    }

    fn step(&self, engine: &mut Engine<P>, state: State) -> Result<(), PinError> {
        let Sample { rx, rx_enable } = engine.pins.sample()?;
        let t = engine.time_in_state as usize;

        match state {
            State::NotInit => {}

            State::Ready => {
                if rx_enable && rx == PREAMBLE_EXPECT[0] {
                    self.clear_rx(engine);
                    self.go(engine, State::RxStart);
                    engine.pins.drive_data(PREAMBLE_SEND[0])?;
                } else if !rx_enable && self.exchange.claim_tx(&mut engine.link) {
                    engine.tx_bits.rewind();
                    self.go(engine, State::TxStart);
                    engine.pins.drive_enable(PinState::High)?;
                    engine.pins.drive_data(PREAMBLE_EXPECT[0])?;
                }
            }

            State::RxStart => match PREAMBLE_EXPECT.get(t) {
                Some(expected) if rx_enable && rx == *expected => {
                    engine.pins.drive_data(PREAMBLE_SEND[t])?;
                    if t == PREAMBLE_LEN - 1 {
                        self.go(engine, State::RxChar);
                    }
                }
                _ => self.rx_finish(engine)?,
            },

            State::RxChar => {
                if !rx_enable {
                    // The postamble has to start on a byte boundary.
                    if engine.rx_bits.is_aligned() && rx == POSTAMBLE_EXPECT[0] {
                        self.go(engine, State::RxAck);
                        engine.pins.drive_data(POSTAMBLE_SEND[0])?;
                    } else {
                        self.go(engine, State::RxErr);
                        engine.pins.drive_data(!POSTAMBLE_SEND[0])?;
                    }
                } else if let Some(byte) = engine.rx_bits.push(rx) {
                    let stored = self
                        .exchange
                        .with_rx(&mut engine.link, |buf| buf.len() + 1 < N && buf.push(byte).is_ok());
                    if stored != Some(true) {
                        self.go(engine, State::RxAbort);
                        engine.pins.drive_data(!POSTAMBLE_SEND[0])?;
                    }
                }
            }

            State::RxAck => {
                if rx_enable {
                    // Peer started something new before we acknowledged.
                    self.rx_finish(engine)?;
                } else {
                    match POSTAMBLE_EXPECT.get(t) {
                        Some(expected) if rx == *expected => {
                            engine.pins.drive_data(POSTAMBLE_SEND[t])?;
                            if t == POSTAMBLE_LEN - 1 {
                                self.go(engine, State::RxChecksum);
                            }
                        }
                        _ => {
                            self.go(engine, State::RxErr);
                            engine.pins.drive_data(!POSTAMBLE_SEND[t.min(POSTAMBLE_LEN - 1)])?;
                        }
                    }
                }
            }

            State::RxChecksum => {
                let verdict = self
                    .exchange
                    .with_rx(&mut engine.link, |buf| Frame::verify(buf).map(|frame| frame.data.len()));
                match verdict {
                    Some(Ok(len)) => {
                        self.exchange.publish_rx(&mut engine.link);
                        self.go(engine, State::RxDone);
                        debug!("received {} byte message on timer {}", len, self.timer.0);
                    }
                    Some(Err(FrameError::ChecksumMismatch { received, calculated })) => {
                        warn!("checksum mismatch: received {:#04x}, calculated {:#04x}", received, calculated);
                        self.go(engine, State::RxErr);
                    }
                    Some(Err(FrameError::TooShort)) | None => self.go(engine, State::RxErr),
                }
            }

            State::RxAbort | State::RxErr => {
                warn!("{:?} on timer {}, message discarded", state, self.timer.0);
                self.rx_finish(engine)?;
            }

            State::RxDone => {
                if self.exchange.rx_released() && !rx_enable {
                    self.rx_finish(engine)?;
                }
            }

            State::TxStart => {
                let echoed = (1..PREAMBLE_LEN).contains(&t) && rx == PREAMBLE_SEND[t - 1];
                if echoed {
                    engine.pins.drive_data(PREAMBLE_EXPECT[t])?;
                    if t == PREAMBLE_LEN - 1 {
                        self.go(engine, State::TxChar);
                    }
                } else {
                    trace!("no preamble echo at symbol {}, retrying later", t);
                    self.tx_abort(engine)?;
                }
            }

            State::TxChar => {
                if rx_enable {
                    // The receiving side always wins.
                    debug!("collision on timer {}, send abandoned", self.timer.0);
                    self.tx_abort(engine)?;
                } else if rx != LISTENING {
                    self.go(engine, State::TxErr);
                } else {
                    let tx_bits = &mut engine.tx_bits;
                    let emitted = self.exchange.with_tx(&mut engine.link, |buf| tx_bits.next_bit(buf));
                    match emitted {
                        Some(Some(Emit::Bit(level))) => engine.pins.drive_data(level)?,
                        Some(Some(Emit::Last(level))) => {
                            self.go(engine, State::TxEnd);
                            engine.pins.drive_data(level)?;
                        }
                        Some(None) => self.go(engine, State::TxEnd),
                        None => self.go(engine, State::TxErr),
                    }
                }
            }

            State::TxEnd => {
                self.go(engine, State::TxAck);
                engine.pins.drive_enable(PinState::Low)?;
                engine.pins.drive_data(POSTAMBLE_EXPECT[0])?;
            }

            State::TxAck => {
                let echoed = (1..=POSTAMBLE_LEN).contains(&t) && rx == POSTAMBLE_SEND[t - 1];
                if !echoed {
                    self.go(engine, State::TxErr);
                } else if t < POSTAMBLE_LEN {
                    engine.pins.drive_data(POSTAMBLE_EXPECT[t])?;
                } else {
                    self.go(engine, State::TxDone);
                }
            }

            State::TxErr => {
                warn!("TxErr on timer {}, message kept for retry", self.timer.0);
                self.tx_abort(engine)?;
            }

            State::TxDone => {
                debug!("message delivered on timer {}", self.timer.0);
                self.tx_done(engine)?;
            }
        }

        Ok(())
    }
}

impl<P: LinkPins + Send, const N: usize> Tick for Channel<P, N> {
    fn tick(&self) {
        let state = self.state();
        if state == State::NotInit {
            return;
        }

        critical_section::with(|cs| {
            let mut engine = self.engine.borrow_ref_mut(cs);
            let engine = &mut *engine;
            if let Err(e) = self.step(engine, state) {
                self.recover(engine, e);
            }
            engine.time_in_state = engine.time_in_state.saturating_add(1);
        });
    }
}

fn payload_of(frame: &[u8]) -> &[u8] {
    match frame.split_last() {
        Some((_, payload)) => payload,
        None => &[],
    }
}
