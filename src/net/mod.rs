// Network layer
// Transport, stream framing, connection lifecycle and the fix simulator

pub mod transport;
pub mod decoder;
pub mod connection;
pub mod simulator;

pub use transport::{BoxedStream, TcpTransport, Transport};
pub use decoder::{DecodeError, Framing, StreamDecoder};
pub use connection::{ConnectionManager, ConnectionOptions, ConnectionState, ConnectionStats};
pub use simulator::{FixSimulator, SimulatorOptions};
