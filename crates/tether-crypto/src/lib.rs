//! Content hashing for tether.
//!
//! Every node of a snapshot's checksum tree is hashed with a domain tag naming
//! its kind, so a source text and an option set with identical bytes can never
//! collide. All hashing wraps BLAKE3; there is no custom cryptography here.

pub mod hasher;

pub use hasher::ContentHasher;
