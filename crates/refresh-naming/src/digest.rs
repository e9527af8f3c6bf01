//! Content digest of a feed artifact.
//!
//! SHA-256 over the raw bytes, hex-encoded and truncated to
//! [`DIGEST_LENGTH`] characters. Input is hashed in fixed-size chunks so
//! artifacts of any size can be fingerprinted without buffering them.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Number of lowercase hex characters kept from the SHA-256 digest.
pub const DIGEST_LENGTH: usize = 6;

const CHUNK_SIZE: usize = 64 * 1024;

/// Digest everything readable from `reader`.
pub fn digest_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(DIGEST_LENGTH);
    Ok(digest)
}

/// Digest the file at `path`.
pub fn digest_file(path: &Path) -> io::Result<String> {
    digest_reader(File::open(path)?)
}

/// Returns true if `s` has the shape of a digest produced by this module.
pub fn is_digest(s: &str) -> bool {
    s.len() == DIGEST_LENGTH && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
