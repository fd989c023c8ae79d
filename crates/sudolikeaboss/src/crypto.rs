//! Cryptographic primitives for the handshake and the encrypted channel.
//!
//! ```text
//! M3      = HMAC-SHA256(secret, SHA256(cs || cc))
//! M4      = HMAC-SHA256(secret, M3)
//! enc key = HMAC-SHA256(secret, M3 || M4 || "encryption")
//! mac key = HMAC-SHA256(secret, M4 || M3 || "hmac")
//! ```
//!
//! Payloads are AES-256-CBC with PKCS#7 padding, authenticated by an
//! HMAC-SHA256 over the base64 text of the IV and ciphertext.

use std::fmt;

use aes::Aes256;
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use hmac::{Hmac, Mac};
use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const BLOCK_SIZE: usize = 16;
pub const IV_LEN: usize = 16;
pub const CHALLENGE_LEN: usize = 16;
pub const SECRET_LEN: usize = 32;
pub const MAC_LEN: usize = 32;

/// URL-safe base64 without padding: transcript values, envelopes, state file.
pub const B64: GeneralPurpose = URL_SAFE_NO_PAD;

/// URL-safe base64 with padding: `cc` and the registration secret.
pub const B64_PADDED: GeneralPurpose = URL_SAFE;

/// Decoder for anything the helper sends; padding optional.
pub const B64_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Fill an array from the OS random source.
///
/// A failing source is an error; there is no weaker fallback.
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| Error::Random(e.to_string()))?;
    Ok(buf)
}

fn new_mac(key: &[u8]) -> Result<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(key).map_err(|e| Error::Cipher(e.to_string()))
}

/// HMAC-SHA256 of the concatenation of `parts`.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; MAC_LEN]> {
    let mut mac = new_mac(key)?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Constant-time check of `tag` against HMAC-SHA256 of `parts`.
pub fn verify_hmac_sha256(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> Result<()> {
    let mut mac = new_mac(key)?;
    for part in parts {
        mac.update(part);
    }
    mac.verify_slice(tag).map_err(|_| Error::InvalidHmac)
}

fn m3_mac(secret: &[u8], cs: &[u8], cc: &[u8]) -> Result<HmacSha256> {
    let digest = Sha256::new().chain_update(cs).chain_update(cc).finalize();
    let mut mac = new_mac(secret)?;
    mac.update(&digest);
    Ok(mac)
}

/// Expected M3 for the server challenge `cs` and client challenge `cc`.
pub fn generate_m3(secret: &[u8], cs: &[u8], cc: &[u8]) -> Result<[u8; MAC_LEN]> {
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&m3_mac(secret, cs, cc)?.finalize().into_bytes());
    Ok(out)
}

/// Check the helper's M3. A mismatch means the helper does not hold our secret.
pub fn verify_m3(secret: &[u8], cs: &[u8], cc: &[u8], m3: &[u8]) -> Result<()> {
    let mac = m3_mac(secret, cs, cc)?;
    if mac.clone().verify_slice(m3).is_ok() {
        return Ok(());
    }
    Err(Error::InvalidM3 {
        actual: B64.encode(m3),
        expected: B64.encode(mac.finalize().into_bytes()),
    })
}

/// M4 = HMAC-SHA256(secret, M3).
pub fn generate_m4(secret: &[u8], m3: &[u8]) -> Result<[u8; MAC_LEN]> {
    hmac_sha256(secret, &[m3])
}

/// Per-session keys. Wiped on drop, never persisted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    encryption: [u8; MAC_LEN],
    hmac: [u8; MAC_LEN],
}

impl SessionKeys {
    /// Derive both keys from the verified transcript. The operand order is
    /// swapped between the two so they differ even when `m3 == m4`.
    pub fn derive(secret: &[u8], m3: &[u8], m4: &[u8]) -> Result<Self> {
        Ok(Self {
            encryption: hmac_sha256(secret, &[m3, m4, b"encryption".as_slice()])?,
            hmac: hmac_sha256(secret, &[m4, m3, b"hmac".as_slice()])?,
        })
    }

    pub fn encryption_key(&self) -> &[u8; MAC_LEN] {
        &self.encryption
    }

    pub fn hmac_key(&self) -> &[u8; MAC_LEN] {
        &self.hmac
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

/// PKCS#7-pad `data` to a whole number of blocks. Always adds 1..=16 bytes.
pub fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.resize(data.len() + pad, pad as u8);
    out
}

/// Strip PKCS#7 padding, rejecting anything malformed.
pub fn pkcs7_unpad(data: &[u8]) -> Result<&[u8]> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(Error::Padding(
            "data length is not a positive multiple of the block size",
        ));
    }
    let pad = usize::from(data[data.len() - 1]);
    if pad == 0 || pad > BLOCK_SIZE {
        return Err(Error::Padding("padding length out of range"));
    }
    let (body, padding) = data.split_at(data.len() - pad);
    if padding.iter().any(|&b| usize::from(b) != pad) {
        return Err(Error::Padding("inconsistent padding bytes"));
    }
    Ok(body)
}

/// AES-256-CBC encrypt with PKCS#7 padding.
pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut buf = pkcs7_pad(plaintext);
    let len = buf.len();
    Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|e| Error::Cipher(e.to_string()))?
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .map_err(|_| Error::Cipher("plaintext is not block aligned".to_string()))?;
    Ok(buf)
}

/// AES-256-CBC decrypt and strip PKCS#7 padding.
pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(Error::Cipher(
            "ciphertext is not a multiple of the AES block size".to_string(),
        ));
    }
    let mut buf = ciphertext.to_vec();
    Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| Error::Cipher(e.to_string()))?
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| Error::Cipher("ciphertext is not block aligned".to_string()))?;
    let len = match pkcs7_unpad(&buf) {
        Ok(body) => body.len(),
        Err(err) => {
            buf.zeroize();
            return Err(err);
        }
    };
    buf.truncate(len);
    Ok(buf)
}
