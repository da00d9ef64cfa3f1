#![cfg_attr(not(test), no_std)]

//! bang_link
//!
//! A half-duplex link between two boards over four GPIO lines, standing in
//! for a UART on an AC controller. Each side has a data-out and data-in line
//! plus an "enable" output and input that say who is talking.
//!
//! Nothing here owns a timer. The host calls [`TickRegistry::dispatch`] from
//! a periodic interrupt at [`config::TICK_FREQ_HZ`]; every tick advances each
//! registered [`Channel`] by one bit. Both boards must tick at the same
//! nominal rate, there is no clock recovery.
//!
//! On the wire a message is a 5 symbol preamble, the payload LSB first, a one
//! byte XOR checksum and a 4 symbol postamble. A receiver that sees anything
//! unexpected drops back to `Ready`; there is no NACK, so lost messages are
//! only visible to whatever protocol runs on top.
//!
//! ## General Usage
//!
//! ```
//! use bang_link::{Channel, Pins, TickRegistry, TimerId};
//! # use core::convert::Infallible;
//! # use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
//! # struct Gpio;
//! # impl ErrorType for Gpio { type Error = Infallible; }
//! # impl OutputPin for Gpio {
//! #     fn set_low(&mut self) -> Result<(), Infallible> { Ok(()) }
//! #     fn set_high(&mut self) -> Result<(), Infallible> { Ok(()) }
//! # }
//! # impl InputPin for Gpio {
//! #     fn is_high(&mut self) -> Result<bool, Infallible> { Ok(false) }
//! #     fn is_low(&mut self) -> Result<bool, Infallible> { Ok(true) }
//! # }
//! # let (tx, tx_enable, rx, rx_enable) = (Gpio, Gpio, Gpio, Gpio);
//!
//! // Usually both of these live in statics.
//! let channel: Channel<_, 256> = Channel::new(Pins::new(tx, tx_enable, rx, rx_enable), TimerId(0));
//! let registry: TickRegistry<'_, 2> = TickRegistry::new();
//!
//! channel.begin(&registry).unwrap();
//!
//! // Timer interrupt:
//! registry.dispatch(TimerId(0));
//!
//! // Application:
//! assert!(channel.put(b"{\"compressor\":\"on\"}"));
//! if channel.ready() {
//!     let message = channel.get();
//!     // ...
//! #   let _ = message;
//! }
//! ```

pub mod channel;
pub mod config;
mod exchange;
pub mod interface;
pub mod protocol;
pub mod registry;

#[doc(inline)]
pub use channel::{BeginError, Channel, PutError};
#[doc(inline)]
pub use interface::{LinkPins, PinError, Pins};
#[doc(inline)]
pub use protocol::State;
#[doc(inline)]
pub use registry::{RegistryError, Tick, TickRegistry, TimerId};
