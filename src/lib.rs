//! Pack, unpack, and verify osquery query packs.
//!
//! Queries live either as a directory of `.sql` source files or as a single
//! JSON pack manifest. [`dir`] and [`pack`] convert between the two through
//! the shared [`QueryMap`] model, and [`verify`] runs each query through
//! `osqueryi` to separate working queries from broken ones and from queries
//! meant for another platform.
pub mod config;
pub mod dir;
pub mod error;
pub mod metadata;
pub mod ops;
pub mod pack;
pub mod platform;
pub mod source;
pub mod util;
pub mod verify;

pub use error::{QueryError, QueryFailure, VerifyError, VerifyFailure};
pub use metadata::{Metadata, QueryMap};
pub use pack::Pack;
