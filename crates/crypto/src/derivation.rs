//! Symmetric key derivation.
//!
//! Credential material is produced in two steps: a seed is drawn from the
//! operating system CSPRNG, then hashed with SHA-256 into a 64 character
//! lower-case hex string. The seed carries the entropy; [`derive`] is a pure
//! formatting step and is never fed the registration id.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Number of random bytes in a freshly generated seed.
pub const SEED_LEN: usize = 32;

/// Length of a derived key in hex characters (256-bit digest).
pub const DERIVED_KEY_LEN: usize = 64;

/// Derive a key string from `seed`.
///
/// Same seed, same output. The result is always [`DERIVED_KEY_LEN`]
/// lower-case hex characters.
pub fn derive(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    hex::encode(digest)
}

/// Generate a hex-encoded random seed. The buffer is wiped on drop.
pub fn generate_seed() -> Zeroizing<String> {
    let mut bytes = Zeroizing::new([0u8; SEED_LEN]);
    OsRng.fill_bytes(&mut bytes[..]);
    Zeroizing::new(hex::encode(&bytes[..]))
}

/// Derive a key from a freshly generated seed.
pub fn derive_fresh() -> String {
    let seed = generate_seed();
    derive(&seed)
}
