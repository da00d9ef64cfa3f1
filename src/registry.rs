//! Several links can share one hardware timer. The timer driver owns a
//! `TickRegistry` and calls [`TickRegistry::dispatch`] from its interrupt;
//! each channel registers itself against the timer it was built for.
//!
//! ```
//! use bang_link::{Tick, TickRegistry, TimerId};
//! use core::sync::atomic::{AtomicU32, Ordering};
//!
//! struct Counter(AtomicU32);
//!
//! impl Tick for Counter {
//!     fn tick(&self) {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!     }
//! }
//!
//! let counter = Counter(AtomicU32::new(0));
//! let registry: TickRegistry<'_, 4> = TickRegistry::new();
//! registry.register(TimerId(0), &counter).unwrap();
//!
//! // From the timer interrupt:
//! registry.dispatch(TimerId(0));
//! assert_eq!(counter.0.load(Ordering::Relaxed), 1);
//! ```

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Vec;
use log::{debug, error, info};

use crate::config::{TICK_FREQ_HZ, TICK_PERIOD_US};

/// Identity of a hardware timer (the IRQ it fires on).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerId(pub u8);

/// Something driven once per timer period. Implementations run in interrupt
/// context: no blocking, no allocation.
pub trait Tick: Sync {
    fn tick(&self);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryError {
    Full,
}

pub struct TickRegistry<'a, const M: usize> {
    handlers: Mutex<RefCell<Vec<(TimerId, &'a dyn Tick), M>>>,
}

impl<'a, const M: usize> TickRegistry<'a, M> {
    pub const fn new() -> Self {
        TickRegistry { handlers: Mutex::new(RefCell::new(Vec::new())) }
    }

    pub fn register(&self, timer: TimerId, handler: &'a dyn Tick) -> Result<(), RegistryError> {
        critical_section::with(|cs| {
            let mut handlers = self.handlers.borrow_ref_mut(cs);
            let first = !handlers.iter().any(|(id, _)| *id == timer);

            if handlers.push((timer, handler)).is_err() {
                error!("tick registry full ({} handlers), timer {} not attached", M, timer.0);
                return Err(RegistryError::Full);
            }

            if first {
                info!("timer {} started at {} Hz ({} us)", timer.0, TICK_FREQ_HZ, TICK_PERIOD_US);
            } else {
                debug!("timer {} now shared by {} handlers", timer.0, handlers.iter().filter(|(id, _)| *id == timer).count());
            }
            Ok(())
        })
    }

    /// No handler slot is left.
    pub fn is_full(&self) -> bool {
        critical_section::with(|cs| self.handlers.borrow_ref(cs).is_full())
    }

    /// Runs every handler registered on `timer`, in registration order.
    /// Returns how many ran.
    pub fn dispatch(&self, timer: TimerId) -> usize {
        critical_section::with(|cs| {
            let handlers = self.handlers.borrow_ref(cs);
            let mut ran = 0;
            for (_, handler) in handlers.iter().filter(|(id, _)| *id == timer) {
                handler.tick();
                ran += 1;
            }
            ran
        })
    }

    pub fn handlers(&self, timer: TimerId) -> usize {
        critical_section::with(|cs| {
            self.handlers.borrow_ref(cs).iter().filter(|(id, _)| *id == timer).count()
        })
    }
}

impl<'a, const M: usize> Default for TickRegistry<'a, M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    struct Counter(AtomicU32);

    impl Tick for Counter {
        fn tick(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    impl Counter {
        fn new() -> Self {
            Counter(AtomicU32::new(0))
        }

        fn count(&self) -> u32 {
            self.0.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn dispatch_runs_only_matching_timer_test() {
        let a = Counter::new();
        let b = Counter::new();
        let c = Counter::new();
        let registry: TickRegistry<'_, 4> = TickRegistry::new();

        registry.register(TimerId(0), &a).unwrap();
        registry.register(TimerId(0), &b).unwrap();
        registry.register(TimerId(1), &c).unwrap();

        assert_eq!(registry.dispatch(TimerId(0)), 2);
        assert_eq!(registry.dispatch(TimerId(0)), 2);
        assert_eq!(registry.dispatch(TimerId(1)), 1);
        assert_eq!(registry.dispatch(TimerId(7)), 0);

        assert_eq!(a.count(), 2);
        assert_eq!(b.count(), 2);
        assert_eq!(c.count(), 1);
        assert_eq!(registry.handlers(TimerId(0)), 2);
    }

    #[test]
    fn register_when_full_test() {
        let a = Counter::new();
        let registry: TickRegistry<'_, 1> = TickRegistry::new();

        assert_eq!(registry.register(TimerId(0), &a), Ok(()));
        assert_eq!(registry.register(TimerId(0), &a), Err(RegistryError::Full));
        assert_eq!(registry.dispatch(TimerId(0)), 1);
    }

    #[test]
    fn is_full_test() {
        let a = Counter::new();
        let registry: TickRegistry<'_, 2> = TickRegistry::new();

        assert!(!registry.is_full());
        registry.register(TimerId(0), &a).unwrap();
        assert!(!registry.is_full());
        registry.register(TimerId(1), &a).unwrap();
        assert!(registry.is_full());
    }
}
