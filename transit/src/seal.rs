//! Sealing: confidentiality/integrity protection bound to a trusted
//! context.
//!
//! The sealed blob layout is `nonce || ciphertext || tag` (AES-256-GCM),
//! with the key derived per context via HKDF-SHA256. Callers must size
//! destination buffers with [`sealed_size`] before sealing; undersized
//! buffers fail the operation instead of truncating.

use aes_gcm::aead::OsRng;
use aes_gcm::{AeadCore, AeadInPlace, Aes256Gcm, Key, KeyInit, Nonce, Tag};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::mitigations;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Fixed plaintext cap for sealed payloads.
pub const PLAIN_CAP: usize = 4096;

/// Root secret standing in for a hardware-fused sealing key. A real
/// trusted runtime would never expose this; here it only has to be stable
/// across process runs so fixtures survive between invocations.
pub(crate) const SEALING_ROOT: &[u8] = b"transit platform sealing root v1";

pub(crate) type SealKey = [u8; 32];

/// Required blob capacity for a plaintext of `plain_len` bytes.
pub const fn sealed_size(plain_len: usize) -> usize {
    NONCE_LEN + plain_len + TAG_LEN
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SealError {
    #[error("payload length {0} exceeds the {PLAIN_CAP}-byte plaintext cap")]
    PayloadTooLarge(usize),
    #[error("destination buffer holds {have} bytes, {need} required")]
    BufferTooSmall { need: usize, have: usize },
    #[error("sealed blob is truncated ({0} bytes)")]
    Truncated(usize),
    #[error("authentication failed")]
    AuthFailure,
}

/// Derive the sealing key for a context identity.
pub(crate) fn derive_key(root: &[u8], identity: &[u8]) -> SealKey {
    let hk = Hkdf::<Sha256>::new(Some(identity), root);
    let mut okm = [0u8; 32];
    hk.expand(b"transit sealing v1", &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    okm
}

/// Seal `plaintext` into `out`, returning the number of bytes written.
pub(crate) fn seal(key: &SealKey, plaintext: &[u8], out: &mut [u8]) -> Result<usize, SealError> {
    if plaintext.len() > PLAIN_CAP {
        return Err(SealError::PayloadTooLarge(plaintext.len()));
    }
    let need = sealed_size(plaintext.len());
    if out.len() < need {
        return Err(SealError::BufferTooSmall {
            need,
            have: out.len(),
        });
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    out[..NONCE_LEN].copy_from_slice(&nonce);
    let (_, rest) = out.split_at_mut(NONCE_LEN);
    let (ct, tag_dst) = rest.split_at_mut(plaintext.len());
    ct.copy_from_slice(plaintext);

    let tag = cipher
        .encrypt_in_place_detached(&nonce, b"", ct)
        .map_err(|_| SealError::AuthFailure)?;
    tag_dst[..TAG_LEN].copy_from_slice(&tag);
    Ok(need)
}

/// Authenticate and decrypt `blob` into `out`, returning the plaintext
/// length. A truncated or corrupted blob fails cleanly; `out` never holds
/// partially-decrypted bytes after a failure.
pub(crate) fn unseal(key: &SealKey, blob: &[u8], out: &mut [u8]) -> Result<usize, SealError> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(SealError::Truncated(blob.len()));
    }
    let plain_len = blob.len() - NONCE_LEN - TAG_LEN;
    if out.len() < plain_len {
        return Err(SealError::BufferTooSmall {
            need: plain_len,
            have: out.len(),
        });
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&blob[..NONCE_LEN]);
    let tag = Tag::from_slice(&blob[blob.len() - TAG_LEN..]);

    let work = &mut out[..plain_len];
    work.copy_from_slice(&blob[NONCE_LEN..NONCE_LEN + plain_len]);
    match cipher.decrypt_in_place_detached(nonce, b"", work, tag) {
        Ok(()) => Ok(plain_len),
        Err(_) => {
            mitigations::ct_zero(work);
            Err(SealError::AuthFailure)
        }
    }
}
