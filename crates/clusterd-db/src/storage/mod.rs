pub mod log_store;
pub mod state_machine;

pub use log_store::SledRaftLogStorage;
pub use state_machine::SqlStateMachine;
