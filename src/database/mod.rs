//! Linkmirror database layer.
//!
//! Provides the SQLite connection and schema migrations used by the local
//! backend service.
//!
//! # Usage
//!
//! ```no_run
//! use linkmirror::database::Database;
//!
//! // Open a persistent database
//! let db = Database::open("linkmirror.db").expect("failed to open database");
//!
//! // Or use an in-memory database for testing
//! let db = Database::open_in_memory().expect("failed to open in-memory database");
//!
//! // Access the underlying connection for queries
//! let conn = db.connection();
//! ```

pub mod connection;
pub mod migrations;

pub use connection::Database;
