pub mod consumer;
pub mod memory;
pub mod nats;
pub mod producer;
pub mod transport;

pub use consumer::{Consumer, Polled};
pub use memory::MemoryBus;
pub use nats::NatsConnector;
pub use producer::Producer;
pub use transport::{BusConnector, BusTransport, Subscription};
