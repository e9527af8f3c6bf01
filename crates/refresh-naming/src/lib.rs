//! Store naming for atomic feed refreshes.
//!
//! Every store created by a refresh cycle carries its creation timestamp and
//! the digest of the feed it was built from in its name. This crate is the
//! only place that knows how to build and parse those names:
//!
//! - [`digest`]: short SHA-256 fingerprint of a downloaded artifact
//! - [`codec`]: `prefix + created_at + "_" + digest` encode/decode
//! - [`record`]: the parsed [`StoreRecord`]

pub mod codec;
pub mod digest;
pub mod record;

pub use codec::{decode, encode, StoreNameCodec, MIN_TIMESTAMP_DIGITS};
pub use digest::{digest_file, digest_reader, is_digest, DIGEST_LENGTH};
pub use record::StoreRecord;
