//! Smartmarks local database layer.
//!
//! Provides SQLite connection management and schema migrations for the
//! local backend.
//!
//! # Usage
//!
//! ```no_run
//! use smartmarks::database::Database;
//!
//! let db = Database::open("smartmarks.db").expect("failed to open database");
//! let conn = db.connection();
//! ```

pub mod connection;
pub mod migrations;

pub use connection::Database;
