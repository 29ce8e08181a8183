//! AES-128/256-CBC encrypt/decrypt used to wrap mesh application messages.
//!
//! Keys arrive as 256-bit hex strings per spec.md §3 ("sendKey/receiveKey
//! are 256-bit hex strings"); this module accepts the decoded 32-byte key
//! directly and lets callers hold the hex form in `Neighbor`.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use tracing::trace;

use crate::error::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Encrypt `plaintext` under `key` and `iv`, PKCS#7-padded.
///
/// `key` must be 16 or 32 bytes (AES-128 or AES-256); any other length is
/// a programmer error in the caller, since all mesh keys are fixed-width.
pub fn encrypt(key: &[u8], iv: &[u8; 16], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match key.len() {
        32 => {
            let enc = Aes256CbcEnc::new(key.into(), iv.into());
            Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
        }
        16 => {
            let enc = Aes128CbcEnc::new(key.into(), iv.into());
            Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
        }
        other => Err(CryptoError::EncryptFailed(format!(
            "unsupported key length {other}"
        ))),
    }
}

/// Decrypt `ciphertext` under `key` and `iv`, rejecting bad padding.
pub fn decrypt(key: &[u8], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let result = match key.len() {
        32 => {
            let dec = Aes256CbcDec::new(key.into(), iv.into());
            dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        }
        16 => {
            let dec = Aes128CbcDec::new(key.into(), iv.into());
            dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        }
        other => {
            return Err(CryptoError::DecryptFailed(format!(
                "unsupported key length {other}"
            )))
        }
    };

    result.map_err(|e| {
        trace!("AES-CBC decrypt padding rejected: {}", e);
        CryptoError::DecryptFailed(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::random_iv;

    #[test]
    fn roundtrip_aes256() {
        let key = [7u8; 32];
        let iv = random_iv();
        let msg = b"hello mesh";

        let ct = encrypt(&key, &iv, msg).unwrap();
        let pt = decrypt(&key, &iv, &ct).unwrap();
        assert_eq!(pt, msg);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let key = [7u8; 32];
        let other_key = [9u8; 32];
        let iv = random_iv();
        let ct = encrypt(&key, &iv, b"secret").unwrap();

        assert!(decrypt(&other_key, &iv, &ct).is_err());
    }
}
