//! Locked, atomically-written record persistence
//!
//! One canonical JSON file per store, shared by independently scheduled
//! processes on the same host. All mutation goes through a single entry
//! point, [`StateStore::perform`], which holds an exclusive lock (a sibling
//! `<name>.lock` file) across the read-modify-write and replaces the
//! canonical file with an atomic temp-file + rename. There is no other
//! mutation API, so callers cannot bypass the lock.
//!
//! Readers that only need a consistent snapshot use [`StateStore::snapshot`]
//! without the lock: the rename is all-or-nothing on the same filesystem, so
//! a plain read never observes a half-written file.

mod error;
mod lock;
mod store;

pub use error::{Error, Result};
pub use store::StateStore;
