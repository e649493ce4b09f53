pub mod supervisor;
pub mod transport;

pub use supervisor::{ConnectionSupervisor, LinkReader};
pub use transport::{
    AsyncStream, LinkStream, MemoryAcceptor, MemoryTransport, TcpTransport, Transport,
};
