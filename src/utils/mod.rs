//! Cryptographic primitives and the binary codec shared by disk and wire.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, ripemd160_digest, sha256_digest,
};
pub use serialization::{decode_from_reader, deserialize, encode_into_writer, serialize};
