//! Content hashing for snapshot verification.

use md5::{Digest, Md5};

/// Lowercase hex MD5 of `data`, the form export manifests declare.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}
