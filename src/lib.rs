pub mod config;
pub mod error;
pub mod message;
pub mod net;
pub mod options;
pub mod pool;
pub mod server;
pub mod transport;

pub use config::{Algorithm, Config, PoolConfig};
pub use error::{Error, Result};
pub use message::{BootpOperation, DhcpMessage};
pub use options::{DhcpOption, DhcpOptions, DhcpType, OptionCode};
pub use pool::{ClientIdentifier, Lease, LeaseState, Pool};
pub use server::{Dispatcher, DirectedMessage};
pub use transport::PktInfoSocket;
