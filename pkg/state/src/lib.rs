//! Persistent state for the authz controller: a SlateDB key/value store with
//! a watch log, an in-memory binding index, and the lister/cache traits the
//! reconciler is written against.

pub mod authz;
pub mod client;
pub mod error;
pub mod index;
pub mod lister;
pub mod watch;

pub use error::StoreError;
