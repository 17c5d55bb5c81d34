// src/portal/crypto.rs — Password encryption and login nonces

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha2::Sha384;

use crate::infra::errors::{BridgeError, Result};

/// Encrypt `password` with the portal's RSA public key (OAEP, SHA-384) and
/// return the ciphertext as standard base64.
///
/// Both SPKI (`BEGIN PUBLIC KEY`) and PKCS#1 (`BEGIN RSA PUBLIC KEY`) PEM
/// encodings are accepted. OAEP is randomized, so two calls never return the
/// same ciphertext.
pub fn encrypt_password(public_key_pem: &str, password: &str) -> Result<String> {
    let key = parse_public_key(public_key_pem.trim())?;
    let mut rng = rand::thread_rng();
    let ciphertext = key
        .encrypt(&mut rng, Oaep::new::<Sha384>(), password.as_bytes())
        .map_err(|e| BridgeError::Crypto(format!("RSA-OAEP encryption failed: {e}")))?;
    Ok(STANDARD.encode(ciphertext))
}

fn parse_public_key(pem: &str) -> Result<RsaPublicKey> {
    if pem.contains("BEGIN RSA PUBLIC KEY") {
        return RsaPublicKey::from_pkcs1_pem(pem)
            .map_err(|e| BridgeError::Crypto(format!("invalid PKCS#1 public key: {e}")));
    }
    RsaPublicKey::from_public_key_pem(pem)
        .map_err(|e| BridgeError::Crypto(format!("invalid public key: {e}")))
}

/// 16 random bytes as 32 lowercase hex characters. One per login attempt.
pub fn generate_nonce() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}
