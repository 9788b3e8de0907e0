//! Cryptographic primitives — ed25519 signing/verification, sha256 hashing.
//!
//! Every feed is keyed by a 32-byte ed25519 public key (the fid) and its
//! matching 32-byte signing seed. Signature verification is never skipped:
//! one constrained-device variant of this protocol disabled verification on
//! a microcontroller where the reference signing library overflowed the
//! stack, but that workaround has no place in a systems implementation and
//! is not reproduced here.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const FID_LEN: usize = 32;
pub const SKEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("signing key must be {SKEY_LEN} bytes, got {0}")]
    BadKeyLength(usize),
    #[error("fid must be {FID_LEN} bytes, got {0}")]
    BadFidLength(usize),
    #[error("signature verification failed")]
    VerificationFailed,
}

/// sha256 of `data`, full 32 bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().into()
}

/// Derive the fid (public key) for a signing seed.
pub fn fid_from_skey(skey: &[u8; SKEY_LEN]) -> [u8; FID_LEN] {
    SigningKey::from_bytes(skey).verifying_key().to_bytes()
}

/// Sign `message` with the 32-byte ed25519 seed `skey`.
pub fn sign(skey: &[u8; SKEY_LEN], message: &[u8]) -> [u8; SIGNATURE_LEN] {
    let signing_key = SigningKey::from_bytes(skey);
    signing_key.sign(message).to_bytes()
}

/// Verify `signature` over `message` under the public key `fid`.
pub fn verify(
    fid: &[u8; FID_LEN],
    message: &[u8],
    signature: &[u8; SIGNATURE_LEN],
) -> Result<(), CryptoError> {
    let verifying_key =
        VerifyingKey::from_bytes(fid).map_err(|_| CryptoError::VerificationFailed)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    verifying_key
        .verify(message, &sig)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// Generate a fresh ed25519 keypair, returning `(skey, fid)`.
///
/// Key-pair generation is otherwise an external collaborator; this helper
/// exists because the version manager's provisioning operations
/// (`create_new_file`, emergency rotation) need to mint new feed identities
/// themselves rather than being handed one for every child feed.
pub fn generate_keypair<R: ed25519_dalek::rand_core::CryptoRngCore>(
    rng: &mut R,
) -> ([u8; SKEY_LEN], [u8; FID_LEN]) {
    let signing_key = SigningKey::generate(rng);
    (signing_key.to_bytes(), signing_key.verifying_key().to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn sign_and_verify_round_trip() {
        let (skey, fid) = generate_keypair(&mut OsRng);
        let msg = b"hello feed";
        let sig = sign(&skey, msg);
        assert!(verify(&fid, msg, &sig).is_ok());
    }

    #[test]
    fn tampered_message_fails_verification() {
        let (skey, fid) = generate_keypair(&mut OsRng);
        let sig = sign(&skey, b"original");
        assert!(verify(&fid, b"tampered", &sig).is_err());
    }

    #[test]
    fn sha256_is_deterministic() {
        assert_eq!(sha256(b"abc"), sha256(b"abc"));
        assert_ne!(sha256(b"abc"), sha256(b"abd"));
    }
}
