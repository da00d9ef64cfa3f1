pub mod bits;
mod frame;
pub mod types;

pub mod encoding;

pub use frame::{checksum, Frame, FrameError};
pub use encoding::{Encodable, EncodingError};
pub use types::State;
