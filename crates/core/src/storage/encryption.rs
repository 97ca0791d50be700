use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};

use crate::errors::CoreError;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;

/// Argon2id cost parameters. Written into the vault header so a vault
/// sealed with one set can still be opened after the defaults change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_cost: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost: 19_456, // 19 MiB
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Bounds accepted when reading a header, so a crafted vault cannot
    /// make key derivation allocate unbounded memory.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(8..=1_048_576).contains(&self.memory_cost) {
            return Err(CoreError::InvalidFileFormat(format!(
                "KDF memory_cost out of range: {} KiB",
                self.memory_cost
            )));
        }
        if !(1..=20).contains(&self.time_cost) {
            return Err(CoreError::InvalidFileFormat(format!(
                "KDF time_cost out of range: {}",
                self.time_cost
            )));
        }
        if !(1..=16).contains(&self.parallelism) {
            return Err(CoreError::InvalidFileFormat(format!(
                "KDF parallelism out of range: {}",
                self.parallelism
            )));
        }
        Ok(())
    }
}

/// Ciphertext plus everything needed to open it except the password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub kdf: KdfParams,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    /// AES-GCM output with the 16-byte tag appended.
    pub ciphertext: Vec<u8>,
}

/// Encrypt `plaintext` under a key derived from `password` with a fresh
/// random salt and nonce.
pub fn seal(plaintext: &[u8], password: &str, kdf: KdfParams) -> Result<Sealed, CoreError> {
    let salt: [u8; SALT_LEN] = random_bytes()?;
    let nonce: [u8; NONCE_LEN] = random_bytes()?;
    let cipher = cipher_for(password, &salt, &kdf)?;

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CoreError::Encryption(format!("AES-GCM encrypt failed: {e}")))?;

    Ok(Sealed {
        kdf,
        salt,
        nonce,
        ciphertext,
    })
}

/// Decrypt a sealed payload. A wrong password and a tampered payload are
/// indistinguishable and both yield [`CoreError::Decryption`].
pub fn open(sealed: &Sealed, password: &str) -> Result<Vec<u8>, CoreError> {
    let cipher = cipher_for(password, &sealed.salt, &sealed.kdf)?;
    Ok(cipher.decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())?)
}

fn cipher_for(password: &str, salt: &[u8], kdf: &KdfParams) -> Result<Aes256Gcm, CoreError> {
    let params = Params::new(kdf.memory_cost, kdf.time_cost, kdf.parallelism, Some(32))
        .map_err(|e| CoreError::Encryption(format!("invalid Argon2 params: {e}")))?;

    let mut key = [0u8; 32];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| CoreError::Encryption(format!("key derivation failed: {e}")))?;

    Aes256Gcm::new_from_slice(&key)
        .map_err(|e| CoreError::Encryption(format!("cipher init failed: {e}")))
}

fn random_bytes<const N: usize>() -> Result<[u8; N], CoreError> {
    let mut buf = [0u8; N];
    getrandom::getrandom(&mut buf)
        .map_err(|e| CoreError::Encryption(format!("OS randomness unavailable: {e}")))?;
    Ok(buf)
}
