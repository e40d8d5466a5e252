// Linkmirror state managers
// Managers own the replica and everything that writes to it: bulk load, change stream, mutations, sessions.

pub mod bulk_loader;
pub mod change_subscriber;
pub mod mutation_coordinator;
pub mod replica_store;
pub mod session_manager;
