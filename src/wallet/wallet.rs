use crate::error::Result;
use crate::utils;
use serde::{Deserialize, Serialize};

const VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;
pub const PUB_KEY_HASH_LEN: usize = 20;

/// Capability set the core consumes from a key holder: produce the public
/// key bytes and DER-sign a 32-byte digest. `Wallet` is the only concrete
/// implementation (ECDSA P-256).
pub trait Signer {
    fn public_key(&self) -> &[u8];
    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>>;
}

/// An ECDSA P-256 key pair.
///
/// The private key is the raw 32-byte big-endian scalar (zero-left-padded),
/// the public key the 65-byte uncompressed point.
#[derive(Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Wallet {
    private_key: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let (private_key, public_key) = utils::new_key_pair()?;
        Ok(Wallet {
            private_key,
            public_key,
        })
    }

    /// Base58Check address: version || pub_key_hash || checksum
    pub fn get_address(&self) -> String {
        convert_address(hash_pub_key(self.public_key.as_slice()).as_slice())
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }
}

impl Signer for Wallet {
    fn public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>> {
        utils::ecdsa_p256_sha256_sign_digest(
            self.private_key.as_slice(),
            self.public_key.as_slice(),
            digest,
        )
    }
}

/// RIPEMD-160(SHA-256(pub_key)), 20 bytes
pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    let pub_key_sha256 = utils::sha256_digest(pub_key);
    utils::ripemd160_digest(pub_key_sha256.as_slice())
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    let first_sha = utils::sha256_digest(payload);
    let second_sha = utils::sha256_digest(first_sha.as_slice());
    second_sha[0..ADDRESS_CHECK_SUM_LEN].to_vec()
}

pub fn validate_address(address: &str) -> bool {
    let payload = match utils::base58_decode(address) {
        Ok(payload) => payload,
        Err(_) => return false,
    };

    // version (1 byte) | pub_key_hash (20 bytes) | checksum (4 bytes)
    if payload.len() < 1 + PUB_KEY_HASH_LEN + ADDRESS_CHECK_SUM_LEN {
        return false;
    }

    let actual_checksum = &payload[payload.len() - ADDRESS_CHECK_SUM_LEN..];
    let target_checksum = checksum(&payload[..payload.len() - ADDRESS_CHECK_SUM_LEN]);

    // Constant-time compare so address validation leaks nothing through timing.
    ring::constant_time::verify_slices_are_equal(actual_checksum, target_checksum.as_slice())
        .is_ok()
}

/// Extract the 20-byte public key hash from a Base58Check address.
/// Returns `None` for anything that does not validate.
pub fn pub_key_hash_from_address(address: &str) -> Option<Vec<u8>> {
    if !validate_address(address) {
        return None;
    }
    let payload = utils::base58_decode(address).ok()?;
    Some(payload[1..payload.len() - ADDRESS_CHECK_SUM_LEN].to_vec())
}

/// Public key hash back to its Base58Check address
pub fn convert_address(pub_key_hash: &[u8]) -> String {
    let mut payload: Vec<u8> = vec![VERSION];
    payload.extend(pub_key_hash);
    let checksum = checksum(payload.as_slice());
    payload.extend(checksum.as_slice());
    utils::base58_encode(payload.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_wallet_address_validates() {
        let wallet = Wallet::new().unwrap();
        let address = wallet.get_address();
        assert!(validate_address(&address));
    }

    #[test]
    fn test_pub_key_hash_round_trip() {
        let wallet = Wallet::new().unwrap();
        let address = wallet.get_address();

        let pkh = pub_key_hash_from_address(&address).unwrap();
        assert_eq!(pkh.len(), 20);
        assert_eq!(pkh, hash_pub_key(wallet.get_public_key()));
        assert_eq!(convert_address(&pkh), address);
    }

    #[test]
    fn test_validate_address_rejects_garbage() {
        assert!(!validate_address(""));
        assert!(!validate_address("not-base58-0OIl"));
        assert!(!validate_address("1111"));

        // Flip one character of a valid address: checksum must fail.
        let wallet = Wallet::new().unwrap();
        let mut tampered = wallet.get_address();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '2' { '3' } else { '2' });
        assert!(!validate_address(&tampered));
    }

    #[test]
    fn test_sign_via_signer_trait() {
        let wallet = Wallet::new().unwrap();
        let digest = crate::utils::sha256_digest(b"digest");
        let signature = wallet.sign(&digest).unwrap();
        assert!(crate::utils::ecdsa_p256_sha256_sign_verify(
            wallet.public_key(),
            &signature,
            &digest
        ));
    }
}
