use ring::digest::{Context, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1, ECDSA_P256_SHA256_ASN1_SIGNING,
};
use ripemd::{Digest as RipemdDigest, Ripemd160};

use crate::error::{BlockchainError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// P-256 scalar size in bytes
const PRIVATE_KEY_LEN: usize = 32;

/// Unix timestamp in seconds
pub fn current_timestamp() -> Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| BlockchainError::Crypto(format!("System time error: {e}")))?
        .as_secs();

    if duration > i64::MAX as u64 {
        return Err(BlockchainError::Crypto("Timestamp overflow".to_string()));
    }

    Ok(duration as i64)
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| BlockchainError::InvalidAddress(format!("Invalid base58 encoding: {e}")))
}

/// Generate an ECDSA P-256 key pair.
///
/// Returns `(private_key, public_key)` where the private key is the raw
/// 32-byte big-endian scalar and the public key is the 65-byte uncompressed
/// point (`0x04 || X || Y`).
pub fn new_key_pair() -> Result<(Vec<u8>, Vec<u8>)> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to generate ECDSA key pair: {e}")))?;
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
        .map_err(|e| {
            BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
        })?;
    let public_key = key_pair.public_key().as_ref().to_vec();
    let private_key = private_scalar_from_pkcs8(pkcs8.as_ref())?;
    Ok((private_key, public_key))
}

/// Extract the raw private scalar from a ring-generated PKCS#8 document.
///
/// ring does not expose the scalar directly. In the ECPrivateKey structure
/// the scalar is the only OCTET STRING of length 32 (`0x04 0x20` header);
/// everything before it is fixed template bytes.
fn private_scalar_from_pkcs8(pkcs8: &[u8]) -> Result<Vec<u8>> {
    pkcs8
        .windows(2)
        .position(|w| w == &[0x04, PRIVATE_KEY_LEN as u8])
        .map(|idx| pkcs8[idx + 2..idx + 2 + PRIVATE_KEY_LEN].to_vec())
        .ok_or_else(|| {
            BlockchainError::Crypto("Private scalar not found in PKCS8 document".to_string())
        })
}

/// Sign a 32-byte digest, producing an ASN.1 DER-encoded signature.
pub fn ecdsa_p256_sha256_sign_digest(
    private_key: &[u8],
    public_key: &[u8],
    message: &[u8],
) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_private_key_and_public_key(
        &ECDSA_P256_SHA256_ASN1_SIGNING,
        private_key,
        public_key,
        &rng,
    )
    .map_err(|e| BlockchainError::Crypto(format!("Failed to reconstruct key pair: {e}")))?;
    let signature = key_pair
        .sign(&rng, message)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to sign message: {e}")))?
        .as_ref()
        .to_vec();
    Ok(signature)
}

/// Verify a DER signature against a 65-byte uncompressed P-256 public key.
/// An unparsable point or malformed signature simply fails verification.
pub fn ecdsa_p256_sha256_sign_verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    let peer_public_key =
        ring::signature::UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, public_key);
    peer_public_key.verify(message, signature).is_ok()
}
