use aes::cipher::{KeyIvInit, StreamCipher as _, StreamCipherSeek};

use crate::{definitions::shared::EncryptionMethod, error::DriveError};

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Seekable stream cipher over byte offsets.
///
/// Decryption of fragment N can begin without producing keystream for
/// fragments `0..N`, and upload chunks can be encrypted starting at an
/// arbitrary plaintext offset. The same primitive serves both directions
/// since CTR-style keystreams are symmetric.
///
/// Seek framing:
/// - AES-CTR: the 16-byte IV is a big-endian 128-bit counter, advanced by
///   `start_byte / 16` blocks; the remaining `start_byte % 16` bytes of
///   keystream are discarded.
/// - ChaCha20: a 32-bit little-endian block counter of `start_byte / 64` is
///   placed before the stored 12-byte nonce; `start_byte % 64` bytes of
///   keystream are discarded.
/// - Plain: identity.
pub struct SeekableCipher {
    inner: CipherInner,
}

enum CipherInner {
    Plain,
    AesCtr(Aes256Ctr),
    ChaCha20(chacha20::ChaCha20),
}

impl SeekableCipher {
    pub fn new(
        method: EncryptionMethod,
        key: Option<&[u8]>,
        iv: Option<&[u8]>,
        start_byte: u64,
    ) -> Result<Self, DriveError> {
        let inner = match method {
            EncryptionMethod::Plain => CipherInner::Plain,
            EncryptionMethod::AesCtr => {
                let (key, iv) = required_material(method, key, iv)?;
                let mut cipher = Aes256Ctr::new_from_slices(key, iv).map_err(|_| {
                    DriveError::Configuration(
                        "AES-CTR requires a 32-byte key and a 16-byte IV".into(),
                    )
                })?;
                seek_to(&mut cipher, start_byte)?;
                CipherInner::AesCtr(cipher)
            }
            EncryptionMethod::ChaCha20 => {
                let (key, iv) = required_material(method, key, iv)?;
                let mut cipher = chacha20::ChaCha20::new_from_slices(key, iv).map_err(|_| {
                    DriveError::Configuration(
                        "ChaCha20 requires a 32-byte key and a 12-byte nonce".into(),
                    )
                })?;
                seek_to(&mut cipher, start_byte)?;
                CipherInner::ChaCha20(cipher)
            }
        };

        Ok(Self { inner })
    }

    /// Applies the keystream in place. Output length equals input length for
    /// every method.
    pub fn transform(&mut self, data: &mut [u8]) {
        match &mut self.inner {
            CipherInner::Plain => {}
            CipherInner::AesCtr(cipher) => cipher.apply_keystream(data),
            CipherInner::ChaCha20(cipher) => cipher.apply_keystream(data),
        }
    }

    /// CTR-style keystreams carry no trailing block.
    pub fn finalize(self) -> Vec<u8> {
        Vec::new()
    }
}

fn required_material<'a>(
    method: EncryptionMethod,
    key: Option<&'a [u8]>,
    iv: Option<&'a [u8]>,
) -> Result<(&'a [u8], &'a [u8]), DriveError> {
    match (key, iv) {
        (Some(key), Some(iv)) => Ok((key, iv)),
        _ => Err(DriveError::Configuration(format!(
            "{method} requires key material"
        ))),
    }
}

fn seek_to<C: StreamCipherSeek>(cipher: &mut C, start_byte: u64) -> Result<(), DriveError> {
    cipher.try_seek(start_byte).map_err(|_| {
        DriveError::Configuration(format!("start byte {start_byte} exceeds keystream length"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0u8; 32];
    const AES_IV: [u8; 16] = [0u8; 16];
    const CHACHA_NONCE: [u8; 12] = [0u8; 12];

    fn plaintext(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[test]
    fn plain_is_identity() {
        let mut cipher = SeekableCipher::new(EncryptionMethod::Plain, None, None, 0)
            .expect("plain cipher");
        let mut data = plaintext(64);
        cipher.transform(&mut data);
        assert_eq!(data, plaintext(64));
        assert!(cipher.finalize().is_empty());
    }

    #[test]
    fn aes_ctr_seek_recovers_suffix() {
        let mut full = SeekableCipher::new(
            EncryptionMethod::AesCtr,
            Some(&KEY),
            Some(&AES_IV),
            0,
        )
        .expect("cipher");
        let mut ciphertext = plaintext(96);
        full.transform(&mut ciphertext);

        for block in [1u64, 2, 5] {
            let start = block * 16;
            let mut seeked = SeekableCipher::new(
                EncryptionMethod::AesCtr,
                Some(&KEY),
                Some(&AES_IV),
                start,
            )
            .expect("seeked cipher");
            let mut tail = ciphertext[start as usize..].to_vec();
            seeked.transform(&mut tail);
            assert_eq!(tail, plaintext(96)[start as usize..]);
        }
    }

    #[test]
    fn aes_ctr_seek_mid_block() {
        let mut full = SeekableCipher::new(
            EncryptionMethod::AesCtr,
            Some(&KEY),
            Some(&AES_IV),
            0,
        )
        .expect("cipher");
        let mut ciphertext = plaintext(64);
        full.transform(&mut ciphertext);

        let start = 21usize;
        let mut seeked = SeekableCipher::new(
            EncryptionMethod::AesCtr,
            Some(&KEY),
            Some(&AES_IV),
            start as u64,
        )
        .expect("seeked cipher");
        let mut tail = ciphertext[start..].to_vec();
        seeked.transform(&mut tail);
        assert_eq!(tail, plaintext(64)[start..]);
    }

    #[test]
    fn chacha20_seek_recovers_suffix() {
        let mut full = SeekableCipher::new(
            EncryptionMethod::ChaCha20,
            Some(&KEY),
            Some(&CHACHA_NONCE),
            0,
        )
        .expect("cipher");
        let mut ciphertext = plaintext(256);
        full.transform(&mut ciphertext);

        for start in [64usize, 128, 77] {
            let mut seeked = SeekableCipher::new(
                EncryptionMethod::ChaCha20,
                Some(&KEY),
                Some(&CHACHA_NONCE),
                start as u64,
            )
            .expect("seeked cipher");
            let mut tail = ciphertext[start..].to_vec();
            seeked.transform(&mut tail);
            assert_eq!(tail, plaintext(256)[start..]);
        }
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        for method in [EncryptionMethod::AesCtr, EncryptionMethod::ChaCha20] {
            let iv: &[u8] = match method {
                EncryptionMethod::AesCtr => &AES_IV,
                _ => &CHACHA_NONCE,
            };
            let mut encryptor =
                SeekableCipher::new(method, Some(&KEY), Some(iv), 0).expect("encryptor");
            let mut decryptor =
                SeekableCipher::new(method, Some(&KEY), Some(iv), 0).expect("decryptor");

            let mut data = plaintext(1000);
            encryptor.transform(&mut data);
            assert_ne!(data, plaintext(1000));
            decryptor.transform(&mut data);
            assert_eq!(data, plaintext(1000));
        }
    }

    #[test]
    fn wrong_key_length_is_a_configuration_error() {
        let short_key = [0u8; 16];
        let result =
            SeekableCipher::new(EncryptionMethod::AesCtr, Some(&short_key), Some(&AES_IV), 0);
        assert!(matches!(result, Err(DriveError::Configuration(_))));

        let result = SeekableCipher::new(EncryptionMethod::ChaCha20, Some(&KEY), None, 0);
        assert!(matches!(result, Err(DriveError::Configuration(_))));
    }
}
