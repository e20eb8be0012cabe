//! Audio subsystem module

pub mod buffer;
pub mod device;
pub mod duplex;
pub mod offline;
pub mod transport;

pub use buffer::RingBuffer;
pub use device::{list_devices, AudioDeviceInfo};
pub use duplex::CpalTransport;
pub use offline::OfflineTransport;
pub use transport::{AudioTransport, DuplexCallback, DuplexStream, StreamConfig};
