//! Stateless AES-128-CBC segment decryption (spec.md §4.1).
//!
//! Unlike the teacher's `DecryptionOffloader` (which unpads with PKCS7 for
//! live segment reassembly), this decrypts with `NoPadding`: the original
//! Python decrypter (`examples/original_source/src/Decrypter.py`) calls
//! `AES.new(...).decrypt(buf)` with no un-padding step, so plaintext length
//! always equals ciphertext length. The on-disk corruption check (length is
//! a positive multiple of 16, spec.md §3/§8) depends on that invariant
//! holding for every segment file, decrypted or not.

use aes::Aes128;
use bytes::Bytes;
use cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding};

use crate::error::EngineError;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Parses an IV hex string, with or without a `0x` prefix (spec.md §4.1, §6.3).
pub fn parse_iv(iv_hex: &str) -> Result<[u8; 16], EngineError> {
    let stripped = iv_hex.trim_start_matches("0x");
    let mut iv = [0u8; 16];
    hex::decode_to_slice(stripped, &mut iv)
        .map_err(|e| EngineError::InvalidInput(format!("invalid IV '{iv_hex}': {e}")))?;
    Ok(iv)
}

/// Decrypts one segment's ciphertext, returning a fresh buffer of the same
/// length as the input. Fails with `InvalidInput` when the ciphertext length
/// is not a positive multiple of 16 or the key/IV are malformed.
pub fn decrypt(ciphertext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Result<Bytes, EngineError> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(EngineError::InvalidInput(format!(
            "ciphertext length {} is not a positive multiple of 16",
            ciphertext.len()
        )));
    }
    let mut buffer = ciphertext.to_vec();
    let cipher = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|e| EngineError::InvalidInput(format!("bad key/IV: {e}")))?;
    let decrypted_len = cipher
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|e| EngineError::InvalidInput(format!("decryption failed: {e}")))?
        .len();
    debug_assert_eq!(decrypted_len, ciphertext.len());
    Ok(Bytes::from(buffer))
}

/// Decrypts on a blocking-pool thread, since AES-CBC is CPU-bound and
/// segments can be a few MB; mirrors the teacher's default posture of
/// offloading decryption off the async runtime.
pub async fn decrypt_offloaded(
    data: Bytes,
    key: [u8; 16],
    iv: [u8; 16],
) -> Result<Bytes, EngineError> {
    tokio::task::spawn_blocking(move || decrypt(&data, &key, &iv))
        .await
        .map_err(|e| EngineError::Internal(format!("decrypt task panicked: {e}")))?
}
