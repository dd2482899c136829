//! Core data model types for nanopub_index

mod hash;
mod nanopub;
mod peer;

pub use hash::Hash;
pub use nanopub::NanopubRecord;
pub use peer::{journal_keys, PeerState};
