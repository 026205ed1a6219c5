//! Developer tooling around the shasta crates: a self-checking round trip
//! through the whole pipeline, a snapshot dump for one scope, and scope
//! cleanup.

pub mod backend;
pub mod cleanup;
pub mod inspect;
pub mod roundtrip;

pub use backend::Backend;
