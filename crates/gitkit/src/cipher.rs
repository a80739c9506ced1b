//! AES-CTR text cipher with hex-encoded keys.
//!
//! The counter block is the first 16 bytes of the key itself, so one key
//! always yields the same keystream. Two messages under the same key
//! therefore leak their XOR. The construction is kept for compatibility
//! with data already encrypted this way; do not use it for new formats.
//!
//! Keys may be 16, 24 or 32 bytes (AES-128/192/256). A single leading `"`
//! on a hex input is ignored.

use aes::{Aes128, Aes192, Aes256};
use ctr::cipher::{KeyIvInit, StreamCipher};
use zeroize::Zeroizing;

use crate::error::CipherError;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Counter block length in bytes.
const BLOCK_LEN: usize = 16;

/// Encrypt `plaintext` and return the lowercase hex ciphertext.
pub fn encrypt(plaintext: &str, hex_key: &str) -> Result<String, CipherError> {
    let key = decode_key(hex_key)?;
    let mut buf = plaintext.as_bytes().to_vec();
    apply_keystream(&key, &mut buf)?;
    Ok(hex::encode(buf))
}

/// Decrypt hex ciphertext produced by [`encrypt`].
///
/// Bytes that are not valid UTF-8 (wrong key) are replaced with U+FFFD.
pub fn decrypt(hex_ciphertext: &str, hex_key: &str) -> Result<String, CipherError> {
    let mut buf =
        hex::decode(strip_quote(hex_ciphertext)).map_err(CipherError::CiphertextHex)?;
    let key = decode_key(hex_key)?;
    apply_keystream(&key, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn strip_quote(input: &str) -> &str {
    input.strip_prefix('"').unwrap_or(input)
}

fn decode_key(hex_key: &str) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    hex::decode(strip_quote(hex_key))
        .map(Zeroizing::new)
        .map_err(CipherError::KeyHex)
}

fn apply_keystream(key: &[u8], buf: &mut [u8]) -> Result<(), CipherError> {
    let len = key.len();
    let iv = key.get(..BLOCK_LEN).ok_or(CipherError::KeyLength(len))?;
    let wrong_size = |_| CipherError::KeyLength(len);

    match len {
        16 => Aes128Ctr::new_from_slices(key, iv)
            .map_err(wrong_size)?
            .apply_keystream(buf),
        24 => Aes192Ctr::new_from_slices(key, iv)
            .map_err(wrong_size)?
            .apply_keystream(buf),
        32 => Aes256Ctr::new_from_slices(key, iv)
            .map_err(wrong_size)?
            .apply_keystream(buf),
        _ => return Err(CipherError::KeyLength(len)),
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_known_vectors() {
        assert_eq!(encrypt("hello world", KEY).unwrap(), "320b683b67db06f9824231");
        assert_eq!(
            encrypt("hello world", "000102030405060708090a0b0c0d0e0f").unwrap(),
            "62f167d92e4e872a83aff0"
        );
        assert_eq!(decrypt("320b683b67db06f9824231", KEY).unwrap(), "hello world");
    }

    #[test]
    fn test_leading_quote_is_stripped() {
        let quoted = format!("\"{}", KEY);
        assert_eq!(
            encrypt("hello world", &quoted).unwrap(),
            encrypt("hello world", KEY).unwrap()
        );
        assert_eq!(decrypt("\"320b683b67db06f9824231", &quoted).unwrap(), "hello world");
    }

    #[test]
    fn test_empty_plaintext() {
        assert_eq!(encrypt("", KEY).unwrap(), "");
        assert_eq!(decrypt("", KEY).unwrap(), "");
    }

    #[test]
    fn test_wrong_key_length() {
        let err = encrypt("secret", "00112233").unwrap_err();
        assert_eq!(err, CipherError::KeyLength(4));
        assert_eq!(
            err.to_string(),
            "invalid key size 4: expected 16, 24 or 32 bytes"
        );

        let forty = "ab".repeat(40);
        assert_eq!(encrypt("x", &forty).unwrap_err(), CipherError::KeyLength(40));
    }

    #[test]
    fn test_distinct_decode_errors() {
        let key_err = encrypt("x", "zz").unwrap_err();
        assert!(matches!(key_err, CipherError::KeyHex(_)));
        assert!(key_err.to_string().starts_with("invalid key encoding"));

        let text_err = decrypt("not hex", KEY).unwrap_err();
        assert!(matches!(text_err, CipherError::CiphertextHex(_)));
        assert!(text_err.to_string().starts_with("invalid ciphertext encoding"));
    }

    #[test]
    fn test_decrypt_checks_ciphertext_before_key() {
        let err = decrypt("xyz", "also bad").unwrap_err();
        assert!(matches!(err, CipherError::CiphertextHex(_)));
    }

    fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
        a.iter().zip(b).map(|(x, y)| x ^ y).collect()
    }

    proptest! {
        #[test]
        fn prop_round_trip(plaintext in ".*", key in proptest::collection::vec(any::<u8>(), 32)) {
            let key = hex::encode(key);
            let ciphertext = encrypt(&plaintext, &key).unwrap();
            prop_assert_eq!(decrypt(&ciphertext, &key).unwrap(), plaintext);
        }

        #[test]
        fn prop_deterministic(
            plaintext in ".*",
            key in proptest::collection::vec(any::<u8>(), 32),
        ) {
            let key = hex::encode(key);
            prop_assert_eq!(encrypt(&plaintext, &key).unwrap(), encrypt(&plaintext, &key).unwrap());
        }

        // Same key means same keystream: XOR of ciphertexts is XOR of plaintexts.
        #[test]
        fn prop_keystream_reuse(
            pair in (1usize..64).prop_flat_map(|n| (
                proptest::string::string_regex(&format!("[a-z]{{{}}}", n)).unwrap(),
                proptest::string::string_regex(&format!("[0-9]{{{}}}", n)).unwrap(),
            )),
            key in proptest::collection::vec(any::<u8>(), 32),
        ) {
            let (a, b) = pair;
            let key = hex::encode(key);
            let ca = hex::decode(encrypt(&a, &key).unwrap()).unwrap();
            let cb = hex::decode(encrypt(&b, &key).unwrap()).unwrap();
            prop_assert_eq!(xor(&ca, &cb), xor(a.as_bytes(), b.as_bytes()));
        }
    }
}
