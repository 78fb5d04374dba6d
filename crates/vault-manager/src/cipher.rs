//! Payload encryption for the files a vault id protects
//!
//! The manager never looks inside these files; it only needs to seed a new
//! one with an encrypted placeholder that `ansible-vault` and
//! `ansible-playbook --vault-id` can open.
//!
//! Format (Ansible Vault 1.1, AES256):
//!
//! ```text
//! $ANSIBLE_VAULT;1.1;AES256
//! hex( hex(salt) "\n" hex(hmac) "\n" hex(ciphertext) ), 80 columns per line
//! ```
//!
//! PBKDF2-HMAC-SHA256 (10000 rounds, 32 byte salt) derives 80 bytes: the
//! AES-256 key, the HMAC-SHA256 key and the CTR counter block. The plaintext
//! is PKCS#7 padded to 16 bytes before encryption and the HMAC covers the
//! ciphertext only.

use crate::error::{Result, VaultError};
use aes::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use ring::{hmac, pbkdf2};
use std::num::NonZeroU32;

/// Document written into every newly created vault file
pub const INITIAL_PAYLOAD: &[u8] = b"---";

const HEADER_TAG: &str = "$ANSIBLE_VAULT";
const FORMAT_VERSION: &str = "1.1";
const CIPHER_NAME: &str = "AES256";

const PBKDF2_ITERATIONS: u32 = 10_000;
const SALT_LEN: usize = 32;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;
const LINE_WIDTH: usize = 80;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

pub trait PayloadCipher {
    fn encrypt(&self, passphrase: &str, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, passphrase: &str, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Ansible Vault 1.1 (AES256) encryption
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsibleVaultCipher;

struct DerivedKeys {
    cipher_key: [u8; KEY_LEN],
    hmac_key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl DerivedKeys {
    fn derive(passphrase: &str, salt: &[u8]) -> Result<Self> {
        let iterations = NonZeroU32::new(PBKDF2_ITERATIONS)
            .ok_or_else(|| VaultError::Encryption("invalid PBKDF2 iteration count".to_string()))?;

        let mut derived = [0u8; 2 * KEY_LEN + IV_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            salt,
            passphrase.as_bytes(),
            &mut derived,
        );

        let mut keys = Self {
            cipher_key: [0u8; KEY_LEN],
            hmac_key: [0u8; KEY_LEN],
            iv: [0u8; IV_LEN],
        };
        keys.cipher_key.copy_from_slice(&derived[..KEY_LEN]);
        keys.hmac_key.copy_from_slice(&derived[KEY_LEN..2 * KEY_LEN]);
        keys.iv.copy_from_slice(&derived[2 * KEY_LEN..]);
        Ok(keys)
    }

    fn apply_keystream(&self, data: &mut [u8]) -> Result<()> {
        let mut cipher = Aes256Ctr::new_from_slices(&self.cipher_key, &self.iv)
            .map_err(|e| VaultError::Encryption(e.to_string()))?;
        cipher.apply_keystream(data);
        Ok(())
    }

    fn hmac_key(&self) -> hmac::Key {
        hmac::Key::new(hmac::HMAC_SHA256, &self.hmac_key)
    }
}

impl AnsibleVaultCipher {
    fn encrypt_with_salt(&self, passphrase: &str, plaintext: &[u8], salt: &[u8]) -> Result<Vec<u8>> {
        let keys = DerivedKeys::derive(passphrase, salt)?;

        let mut ciphertext = pkcs7_pad(plaintext);
        keys.apply_keystream(&mut ciphertext)?;
        let tag = hmac::sign(&keys.hmac_key(), &ciphertext);

        let inner = [
            hex::encode(salt),
            hex::encode(tag),
            hex::encode(&ciphertext),
        ]
        .join("\n");
        let body = hex::encode(inner.as_bytes());

        let mut out = format!("{};{};{}\n", HEADER_TAG, FORMAT_VERSION, CIPHER_NAME);
        for line in body.as_bytes().chunks(LINE_WIDTH) {
            // hex output is ASCII
            out.push_str(&String::from_utf8_lossy(line));
            out.push('\n');
        }
        Ok(out.into_bytes())
    }
}

impl PayloadCipher for AnsibleVaultCipher {
    fn encrypt(&self, passphrase: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        self.encrypt_with_salt(passphrase, plaintext, &salt)
    }

    fn decrypt(&self, passphrase: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let text = std::str::from_utf8(ciphertext)
            .map_err(|_| VaultError::Decryption("vault file is not text".to_string()))?;
        let mut lines = text.lines();

        let header = lines.next().unwrap_or_default().trim();
        check_header(header)?;

        let body: String = lines.map(str::trim).collect();
        let inner = decode_hex(&body)?;
        let mut parts = inner.split(|b| *b == b'\n');
        let (Some(salt), Some(tag), Some(data), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(VaultError::Decryption("malformed vault payload".to_string()));
        };

        let salt = decode_hex(salt)?;
        let tag = decode_hex(tag)?;
        let mut data = decode_hex(data)?;

        let keys = DerivedKeys::derive(passphrase, &salt)?;
        hmac::verify(&keys.hmac_key(), &data, &tag)
            .map_err(|_| VaultError::Decryption("HMAC verification failed".to_string()))?;

        keys.apply_keystream(&mut data)?;
        pkcs7_unpad(data)
    }
}

fn check_header(header: &str) -> Result<()> {
    let fields: Vec<&str> = header.split(';').collect();
    match fields.as_slice() {
        [tag, "1.1" | "1.2", cipher, ..] if *tag == HEADER_TAG && *cipher == CIPHER_NAME => Ok(()),
        [tag, ..] if *tag == HEADER_TAG => Err(VaultError::Decryption(format!(
            "unsupported vault format: {}",
            header
        ))),
        _ => Err(VaultError::Decryption("not an ansible vault file".to_string())),
    }
}

fn decode_hex<T: AsRef<[u8]>>(raw: T) -> Result<Vec<u8>> {
    hex::decode(raw).map_err(|e| VaultError::Decryption(format!("invalid hex: {}", e)))
}

fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad = BLOCK_LEN - data.len() % BLOCK_LEN;
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.resize(data.len() + pad, pad as u8);
    out
}

fn pkcs7_unpad(mut data: Vec<u8>) -> Result<Vec<u8>> {
    let invalid = || VaultError::Decryption("invalid padding".to_string());

    let pad = usize::from(*data.last().ok_or_else(invalid)?);
    if pad == 0 || pad > BLOCK_LEN || pad > data.len() {
        return Err(invalid());
    }
    if !data[data.len() - pad..].iter().all(|b| usize::from(*b) == pad) {
        return Err(invalid());
    }
    data.truncate(data.len() - pad);
    Ok(data)
}
