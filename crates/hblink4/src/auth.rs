//! Challenge/response hashing (§4.5 Authentication): `SHA-256(salt ||
//! passphrase)`, ASCII-hex encoded.

use sha2::{Digest, Sha256};

pub fn challenge_hash(salt: &[u8; 4], passphrase: &str) -> [u8; 64] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(passphrase.as_bytes());
    let digest = hasher.finalize();

    let mut hex_bytes = [0u8; 64];
    hex::encode_to_slice(digest, &mut hex_bytes).expect("sha256 digest is exactly 32 bytes");
    hex_bytes
}

pub fn random_salt() -> [u8; 4] {
    rand::random()
}

pub fn verify(salt: &[u8; 4], passphrase: &str, candidate_hex: &[u8; 64]) -> bool {
    challenge_hash(salt, passphrase) == *candidate_hex
}
