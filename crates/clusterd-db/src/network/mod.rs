pub mod factory;
pub mod messages;
pub mod protocol;
pub mod server;
pub mod transport;

pub use factory::DqliteNetworkFactory;
pub use messages::RaftMessage;
pub use protocol::{accepted_response, rejected_response, version_is_compatible, UPGRADE_PROTOCOL, VERSION_HEADER};
pub use server::serve_connection;
pub use transport::DqliteRaftNetwork;
