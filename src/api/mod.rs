pub(crate) mod connection;
pub(crate) mod session;

pub use connection::{Connection, ConnectionConfig};
pub use session::Session;
