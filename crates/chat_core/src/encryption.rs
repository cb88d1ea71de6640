use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Result};
use rand::Rng;

const KEY_ENV_VAR: &str = "COURIER_SECRET_KEY";

/// Encryption key for stored secrets.
/// Priority: environment variable (64 hex chars), otherwise a random key
/// that is only valid for the current process.
pub fn encryption_key() -> [u8; 32] {
    if let Ok(key_hex) = std::env::var(KEY_ENV_VAR) {
        if let Ok(key) = hex::decode(key_hex.trim()) {
            if let Ok(key) = <[u8; 32]>::try_from(key.as_slice()) {
                return key;
            }
        }
        log::warn!("{} is not a 32-byte hex key, using an ephemeral key", KEY_ENV_VAR);
    }
    rand::thread_rng().gen::<[u8; 32]>()
}

/// Encrypt a secret.
/// Format: hex(nonce) + ":" + hex(ciphertext)
pub fn encrypt(key: &[u8; 32], plaintext: &str) -> Result<String> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Failed to create cipher: {e}"))?;

    let nonce_bytes: [u8; 12] = rand::thread_rng().gen();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {e}"))?;

    Ok(format!("{}:{}", hex::encode(nonce_bytes), hex::encode(ciphertext)))
}

/// Decrypt a secret produced by [`encrypt`]
pub fn decrypt(key: &[u8; 32], encrypted: &str) -> Result<String> {
    let (nonce_hex, cipher_hex) = encrypted
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid encrypted format"))?;

    let nonce_bytes = hex::decode(nonce_hex).map_err(|e| anyhow!("Invalid nonce: {e}"))?;
    if nonce_bytes.len() != 12 {
        return Err(anyhow!("Invalid nonce length: {}", nonce_bytes.len()));
    }
    let ciphertext = hex::decode(cipher_hex).map_err(|e| anyhow!("Invalid ciphertext: {e}"))?;

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Failed to create cipher: {e}"))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|e| anyhow!("Decryption failed: {e}"))?;

    String::from_utf8(plaintext).map_err(|e| anyhow!("Invalid UTF-8: {e}"))
}
