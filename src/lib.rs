pub mod clock;
pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod log_record;
pub mod receiver;
pub mod sender;
pub mod transport;

#[doc(hidden)]
pub mod test_support;

pub use clock::{Clock, MonotonicClock};
pub use codec::Packet;
pub use config::Config;
pub use error::{Error, Result};
pub use receiver::Receiver;
pub use sender::Sender;
pub use transport::{DatagramTransport, UdpTransport};
