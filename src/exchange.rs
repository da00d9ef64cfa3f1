//! Buffer handoff between the tick handler and application code.
//!
//! Each buffer has exactly one writer at a time and the handoff is done with
//! flags rather than a lock, so the tick handler never waits on the
//! application:
//!
//! * RX: the tick handler fills the buffer while the owner tag says `Link`.
//!   Publishing a verified message flips the tag to `App`; consuming it flips
//!   it back. The tick handler does not touch the buffer in between.
//! * TX: the application may write while `tx_in_progress` is clear and it has
//!   cleared `tx_ready` itself. The tick handler only reads while it holds
//!   `tx_in_progress`, which it can only take while `tx_ready` is set.
//!
//! Concurrent producers and concurrent consumers are serialized against each
//! other by two spin gates. Those are only ever taken from application code.

use core::cell::{Cell, UnsafeCell};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use critical_section::Mutex;
use heapless::Vec;

use crate::protocol::{Encodable, EncodingError, Frame};

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Owner {
    Link = 0,
    App = 1,
}

/// Proof of being the tick context. Only the channel engine holds one, and
/// the engine is behind a `RefCell`, so at most one tick runs at a time.
#[derive(Debug)]
pub(crate) struct LinkSide(());

impl LinkSide {
    pub(crate) const fn new() -> Self {
        LinkSide(())
    }
}

struct Slot<const N: usize>(UnsafeCell<Vec<u8, N>>);

impl<const N: usize> Slot<N> {
    const fn new() -> Self {
        Slot(UnsafeCell::new(Vec::new()))
    }

    /// # Safety
    /// The caller must be the buffer's current owner under the flag protocol.
    #[allow(clippy::mut_from_ref)]
    unsafe fn get(&self) -> &mut Vec<u8, N> {
        &mut *self.0.get()
    }
}

/// Spin lock for application callers. Never taken from the tick handler.
struct Gate(Mutex<Cell<bool>>);

struct GateGuard<'a>(&'a Gate);

impl Gate {
    const fn new() -> Self {
        Gate(Mutex::new(Cell::new(false)))
    }

    fn acquire(&self) -> GateGuard<'_> {
        while critical_section::with(|cs| self.0.borrow(cs).replace(true)) {
            spin_loop();
        }
        GateGuard(self)
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        critical_section::with(|cs| self.0 .0.borrow(cs).set(false));
    }
}

pub(crate) struct Exchange<const N: usize> {
    rx: Slot<N>,
    rx_owner: AtomicU8,
    tx: Slot<N>,
    tx_ready: AtomicBool,
    tx_in_progress: AtomicBool,
    producer: Gate,
    consumer: Gate,
}

// SAFETY: the slots are only reached through the methods below, which follow
// the ownership protocol described at the top of this module. Link-side
// methods require a `LinkSide`, which only one context can hold mutably.
unsafe impl<const N: usize> Sync for Exchange<N> {}

impl<const N: usize> Exchange<N> {
    pub(crate) const fn new() -> Self {
        Exchange {
            rx: Slot::new(),
            rx_owner: AtomicU8::new(Owner::Link as u8),
            tx: Slot::new(),
            tx_ready: AtomicBool::new(false),
            tx_in_progress: AtomicBool::new(false),
            producer: Gate::new(),
            consumer: Gate::new(),
        }
    }

    // Tick context.

    pub(crate) fn with_rx<R>(&self, _: &mut LinkSide, f: impl FnOnce(&mut Vec<u8, N>) -> R) -> Option<R> {
        if self.rx_owner.load(Ordering::Acquire) != Owner::Link as u8 {
            return None;
        }
        // SAFETY: the link owns the RX slot until `publish_rx`.
        Some(f(unsafe { self.rx.get() }))
    }

    /// Hands the verified RX buffer to the application.
    pub(crate) fn publish_rx(&self, _: &mut LinkSide) {
        self.rx_owner.store(Owner::App as u8, Ordering::Release);
    }

    /// True once the application has consumed what was published.
    pub(crate) fn rx_released(&self) -> bool {
        self.rx_owner.load(Ordering::Acquire) == Owner::Link as u8
    }

    /// Takes the TX buffer for sending if a message is staged.
    pub(crate) fn claim_tx(&self, _: &mut LinkSide) -> bool {
        // Store-then-check pairs with `stage`, which clears `tx_ready` and
        // then checks `tx_in_progress`. With SeqCst at least one side sees
        // the other.
        self.tx_in_progress.store(true, Ordering::SeqCst);
        if self.tx_ready.load(Ordering::SeqCst) {
            true
        } else {
            self.tx_in_progress.store(false, Ordering::SeqCst);
            false
        }
    }

    pub(crate) fn with_tx<R>(&self, _: &mut LinkSide, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        if !self.tx_in_progress.load(Ordering::SeqCst) {
            return None;
        }
        // SAFETY: `stage` does not write while `tx_in_progress` is set.
        let buf: &[u8] = unsafe { self.tx.get() };
        Some(f(buf))
    }

    /// Gives the TX buffer back. A delivered message is dropped and
    /// `tx_ready` cleared; otherwise it stays staged for another attempt.
    pub(crate) fn release_tx(&self, _: &mut LinkSide, delivered: bool) {
        if !self.tx_in_progress.load(Ordering::SeqCst) {
            return;
        }
        if delivered {
            // SAFETY: still holding `tx_in_progress`.
            unsafe { self.tx.get() }.clear();
            self.tx_ready.store(false, Ordering::SeqCst);
        }
        self.tx_in_progress.store(false, Ordering::SeqCst);
    }

    // Application context.

    /// Replaces the staged TX frame. Spins while a send is in flight; the
    /// tick handler always finishes or abandons it on its own.
    pub(crate) fn stage(&self, frame: &Frame<'_>) -> Result<(), EncodingError> {
        let _guard = self.producer.acquire();

        self.tx_ready.store(false, Ordering::SeqCst);
        while self.tx_in_progress.load(Ordering::SeqCst) {
            spin_loop();
        }

        // SAFETY: `tx_ready` is clear and `tx_in_progress` was observed clear
        // afterwards, so the tick handler cannot claim the buffer until
        // `tx_ready` is set again below.
        let buffer = unsafe { self.tx.get() };
        buffer.clear();
        buffer.resize(frame.len(), 0).map_err(|_| EncodingError)?;
        frame.encode(buffer)?;

        self.tx_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn rx_published(&self) -> bool {
        self.rx_owner.load(Ordering::Acquire) == Owner::App as u8
    }

    /// Runs `f` over the published frame (checksum included). If `f` returns
    /// `Some` the buffer goes back to the link; on `None` it stays published.
    pub(crate) fn take_rx<R>(&self, f: impl FnOnce(&[u8]) -> Option<R>) -> Option<R> {
        let _guard = self.consumer.acquire();

        if !self.rx_published() {
            return None;
        }
        // SAFETY: published and not yet handed back; the tick handler leaves
        // the buffer alone until `rx_owner` returns to `Link`.
        let buf: &[u8] = unsafe { self.rx.get() };
        let result = f(buf)?;
        self.rx_owner.store(Owner::Link as u8, Ordering::Release);
        Some(result)
    }

    pub(crate) fn tx_ready(&self) -> bool {
        self.tx_ready.load(Ordering::SeqCst)
    }

    pub(crate) fn tx_in_progress(&self) -> bool {
        self.tx_in_progress.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_then_claim_test() {
        let exchange: Exchange<16> = Exchange::new();
        let mut link = LinkSide::new();

        assert!(!exchange.claim_tx(&mut link));
        assert!(!exchange.tx_in_progress());

        exchange.stage(&Frame::new(b"fan")).unwrap();
        assert!(exchange.tx_ready());
        assert!(exchange.claim_tx(&mut link));
        assert_eq!(exchange.with_tx(&mut link, |b| b.len()), Some(4));

        exchange.release_tx(&mut link, false);
        assert!(exchange.tx_ready());
        assert!(!exchange.tx_in_progress());

        assert!(exchange.claim_tx(&mut link));
        exchange.release_tx(&mut link, true);
        assert!(!exchange.tx_ready());
        assert_eq!(exchange.with_tx(&mut link, |b| b.len()), None);
    }

    #[test]
    fn stage_rejects_oversized_frame_test() {
        let exchange: Exchange<4> = Exchange::new();
        assert_eq!(exchange.stage(&Frame::new(b"heat")), Err(EncodingError));
    }

    #[test]
    fn rx_handoff_test() {
        let exchange: Exchange<16> = Exchange::new();
        let mut link = LinkSide::new();

        exchange.with_rx(&mut link, |b| b.extend_from_slice(b"cool\x05").unwrap());
        assert_eq!(exchange.take_rx(|b| Some(b.len())), None);

        exchange.publish_rx(&mut link);
        assert!(exchange.rx_published());
        assert!(!exchange.rx_released());
        assert_eq!(exchange.with_rx(&mut link, |b| b.clear()), None);

        // Declined: stays published.
        assert_eq!(exchange.take_rx(|_| None::<usize>), None);
        assert!(exchange.rx_published());

        assert_eq!(exchange.take_rx(|b| Some(b.len())), Some(5));
        assert_eq!(exchange.take_rx(|b| Some(b.len())), None);
        assert!(exchange.rx_released());
    }

    #[test]
    fn stage_waits_for_send_in_flight_test() {
        use std::sync::atomic::AtomicBool as Flag;
        use std::thread;
        use std::time::Duration;

        let exchange: Exchange<16> = Exchange::new();
        let staged = Flag::new(false);
        exchange.stage(&Frame::new(b"old")).unwrap();

        thread::scope(|s| {
            let mut link = LinkSide::new();
            assert!(exchange.claim_tx(&mut link));

            s.spawn(|| {
                exchange.stage(&Frame::new(b"new")).unwrap();
                staged.store(true, Ordering::SeqCst);
            });

            thread::sleep(Duration::from_millis(50));
            assert!(!staged.load(Ordering::SeqCst));
            assert_eq!(exchange.with_tx(&mut link, |b| b[..3] == *b"old"), Some(true));

            exchange.release_tx(&mut link, true);
        });

        assert!(staged.load(Ordering::SeqCst));
        let mut link = LinkSide::new();
        assert!(exchange.claim_tx(&mut link));
        assert_eq!(exchange.with_tx(&mut link, |b| b[..3] == *b"new"), Some(true));
    }
}
