use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Encrypt a token secret with AES-256-CBC. The 16-byte IV is random per
/// ciphertext and prefixed to it; the whole blob is base64-encoded for
/// storage.
pub fn encrypt_secret(key: &[u8; 32], plaintext: &str) -> String {
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(key, &iv).expect("key/iv lengths are fixed");
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut blob = iv.to_vec();
    blob.extend_from_slice(&ciphertext);
    base64::engine::general_purpose::STANDARD.encode(blob)
}

/// Decrypt a stored token secret. Returns None on any malformed input
/// (bad base64, short blob, bad padding, non-UTF8 plaintext).
pub fn decrypt_secret(key: &[u8; 32], encoded: &str) -> Option<String> {
    let blob = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    if blob.len() < 16 {
        return None;
    }
    let (iv, ciphertext) = blob.split_at(16);
    let cipher = Aes256CbcDec::new_from_slices(key, iv).ok()?;
    let plaintext = cipher.decrypt_padded_vec_mut::<Pkcs7>(ciphertext).ok()?;
    String::from_utf8(plaintext).ok()
}

/// Hash a password with bcrypt (adaptive, salted; crate default cost 12).
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Sign a session as `user_id.expires_at.hex(hmac)`. The cookie carries
/// only the id and expiry; everything else is looked up per request.
pub fn sign_session(key: &str, user_id: i64, expires_at: i64) -> String {
    let payload = format!("{user_id}.{expires_at}");
    format!("{payload}.{}", session_mac(key, &payload))
}

/// Verify a session cookie value. Returns the user id if the signature
/// matches and the expiry is in the future.
pub fn verify_session(key: &str, cookie: &str, now: i64) -> Option<i64> {
    let mut parts = cookie.splitn(3, '.');
    let user_id: i64 = parts.next()?.parse().ok()?;
    let expires_at: i64 = parts.next()?.parse().ok()?;
    let sig = parts.next()?;

    let payload = format!("{user_id}.{expires_at}");
    if session_mac(key, &payload) != sig {
        return None;
    }
    if expires_at <= now {
        return None;
    }
    Some(user_id)
}

fn session_mac(key: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
