mod cancel;
mod channel;
mod error;
mod message;
mod traits;

pub use self::cancel::CancellationToken;
pub use self::channel::*;
pub use self::error::{Error, Result};
pub use self::message::Message;
pub use self::traits::{ProtocolDecoder, ProtocolEncoder, Transport};
