use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use ignis_core::IgnisError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_LEN: usize = 16;

/// Supported symmetric cipher modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AesMode {
    #[default]
    Aes256Cbc,
}

impl AesMode {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "aes-256-cbc" => Some(Self::Aes256Cbc),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aes256Cbc => "aes-256-cbc",
        }
    }
}

/// Symmetric cipher over a shared secret.
///
/// Ciphertexts are transported as `base64(iv):base64(ciphertext)` with a
/// fresh IV per encryption.
#[derive(Clone)]
pub struct AesCipher {
    key: [u8; 32],
    mode: AesMode,
}

impl AesCipher {
    /// Derive the cipher from a secret: the secret's bytes, truncated or
    /// zero-padded to the 32-byte key size.
    pub fn new(secret: &str, mode: AesMode) -> Self {
        let mut key = [0u8; 32];
        let bytes = secret.as_bytes();
        let len = bytes.len().min(32);
        key[..len].copy_from_slice(&bytes[..len]);
        Self { key, mode }
    }

    pub fn mode(&self) -> AesMode {
        self.mode
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, IgnisError> {
        let iv: [u8; IV_LEN] = rand::random();
        let ciphertext = Aes256CbcEnc::new_from_slices(&self.key, &iv)
            .map_err(|e| IgnisError::internal(format!("cipher init: {e}")))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        Ok(format!(
            "{}:{}",
            BASE64.encode(iv),
            BASE64.encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, data: &str) -> Result<String, IgnisError> {
        let (iv_part, ct_part) = data
            .split_once(':')
            .ok_or_else(|| IgnisError::internal("malformed ciphertext"))?;
        let iv = BASE64
            .decode(iv_part)
            .map_err(|e| IgnisError::internal(format!("bad iv encoding: {e}")))?;
        let ciphertext = BASE64
            .decode(ct_part)
            .map_err(|e| IgnisError::internal(format!("bad ciphertext encoding: {e}")))?;
        let plaintext = Aes256CbcDec::new_from_slices(&self.key, &iv)
            .map_err(|e| IgnisError::internal(format!("cipher init: {e}")))?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| IgnisError::internal("decryption failed"))?;
        String::from_utf8(plaintext).map_err(|_| IgnisError::internal("decrypted data is not UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let cipher = AesCipher::new("a-shared-secret", AesMode::Aes256Cbc);
        let ciphertext = cipher.encrypt("hello world").unwrap();
        assert_ne!(ciphertext, "hello world");
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), "hello world");
    }

    #[test]
    fn fresh_iv_per_encryption() {
        let cipher = AesCipher::new("secret", AesMode::Aes256Cbc);
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), cipher.decrypt(&b).unwrap());
    }

    #[test]
    fn wrong_key_fails() {
        let cipher = AesCipher::new("secret-one", AesMode::Aes256Cbc);
        let other = AesCipher::new("secret-two", AesMode::Aes256Cbc);
        let ciphertext = cipher.encrypt("payload").unwrap();
        assert!(other.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(AesMode::parse("aes-256-cbc"), Some(AesMode::Aes256Cbc));
        assert!(AesMode::parse("aes-128-gcm").is_none());
        assert_eq!(AesMode::default().as_str(), "aes-256-cbc");
    }
}
