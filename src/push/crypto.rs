//! `aes128gcm` message encryption for Web Push (RFC 8291 on top of RFC 8188).
//!
//! Each message gets its own ephemeral key pair and salt. The output is a
//! single record carrying the header
//! `salt(16) || rs(4) || idlen(1) || keyid(65)` followed by the ciphertext,
//! where `rs` is the ciphertext length and `keyid` the ephemeral public key.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit, Nonce};
use base64::{URL_SAFE_NO_PAD, decode_config};
use hmac::{Hmac, Mac};
use p256::PublicKey;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;

use crate::error::CryptoError;

pub const SALT_LEN: usize = 16;
pub const PUBLIC_KEY_LEN: usize = 65;
pub const AUTH_SECRET_LEN: usize = 16;
pub const HEADER_LEN: usize = SALT_LEN + 4 + 1 + PUBLIC_KEY_LEN;
const CEK_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const PADDING_DELIMITER: u8 = 0x02;

const KEY_INFO_PREFIX: &[u8] = b"WebPush: info\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

type HmacSha256 = Hmac<Sha256>;

/// Encrypts `plaintext` for one subscriber.
///
/// `p256dh` and `auth` are the subscriber's base64url key material as handed
/// out by the browser. Plaintext shorter than `padding_target` is zero-padded
/// up to that length.
pub fn encrypt(
    plaintext: &[u8],
    p256dh: &str,
    auth: &str,
    padding_target: usize,
) -> Result<Vec<u8>, CryptoError> {
    let mut rng = OsRng;
    encrypt_with_rng(plaintext, p256dh, auth, padding_target, &mut rng)
}

pub(crate) fn encrypt_with_rng<R: RngCore + CryptoRng>(
    plaintext: &[u8],
    p256dh: &str,
    auth: &str,
    padding_target: usize,
    rng: &mut R,
) -> Result<Vec<u8>, CryptoError> {
    let subscriber_public_raw =
        decode_config(p256dh.trim(), URL_SAFE_NO_PAD).map_err(|_| CryptoError::Base64 {
            field: "p256dh",
        })?;
    let auth_secret = decode_config(auth.trim(), URL_SAFE_NO_PAD)
        .map_err(|_| CryptoError::Base64 { field: "auth" })?;
    if auth_secret.len() != AUTH_SECRET_LEN {
        return Err(CryptoError::AuthSecretLength(auth_secret.len()));
    }
    if subscriber_public_raw.len() != PUBLIC_KEY_LEN {
        return Err(CryptoError::PublicKey);
    }
    let subscriber_public =
        PublicKey::from_sec1_bytes(&subscriber_public_raw).map_err(|_| CryptoError::PublicKey)?;

    let local_secret = EphemeralSecret::random(rng);
    let local_public = local_secret.public_key().to_encoded_point(false);
    let local_public_raw = local_public.as_bytes();
    let shared_secret = local_secret.diffie_hellman(&subscriber_public);

    let prk_key = hmac_sha256(&auth_secret, &[shared_secret.raw_secret_bytes().as_slice()])?;
    let ikm = hmac_sha256(
        &prk_key,
        &[
            KEY_INFO_PREFIX,
            subscriber_public_raw.as_slice(),
            local_public_raw,
            &[0x01u8],
        ],
    )?;

    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);

    let prk = hmac_sha256(&salt, &[ikm.as_slice()])?;
    let cek = hmac_sha256(&prk, &[CEK_INFO, &[0x01u8]])?;
    let nonce = hmac_sha256(&prk, &[NONCE_INFO, &[0x01u8]])?;

    let padding = padding_target.saturating_sub(plaintext.len());
    let mut framed = Vec::with_capacity(plaintext.len() + 1 + padding);
    framed.extend_from_slice(plaintext);
    framed.push(PADDING_DELIMITER);
    framed.resize(framed.len() + padding, 0);

    let cipher =
        Aes128Gcm::new_from_slice(&cek[..CEK_LEN]).map_err(|_| CryptoError::Encryption)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce[..NONCE_LEN]), framed.as_slice())
        .map_err(|_| CryptoError::Encryption)?;
    let record_size = u32::try_from(ciphertext.len()).map_err(|_| CryptoError::Encryption)?;

    let mut body = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&record_size.to_be_bytes());
    body.push(PUBLIC_KEY_LEN as u8);
    body.extend_from_slice(local_public_raw);
    body.extend_from_slice(&ciphertext);
    Ok(body)
}

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], CryptoError> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| CryptoError::Derivation)?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}
