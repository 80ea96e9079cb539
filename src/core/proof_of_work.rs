use crate::core::Block;
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::info;
use num_bigint::{BigInt, Sign};
use std::ops::ShlAssign;

/// Required number of leading zero bits in a block hash. The hash read as a
/// big-endian unsigned integer must be below `1 << (256 - TARGET_BITS)`.
const TARGET_BITS: i64 = 24;

const MAX_NONCE: i64 = i64::MAX;

pub struct ProofOfWork {
    block: Block,
    target: BigInt,
}

impl ProofOfWork {
    pub fn new_proof_of_work(block: Block) -> ProofOfWork {
        let mut target = BigInt::from(1);
        target.shl_assign(256 - TARGET_BITS as u32);
        ProofOfWork { block, target }
    }

    /// Recompute the hash at the recorded nonce and re-check the target.
    pub fn validate(block: &Block) -> bool {
        let pow = ProofOfWork::new_proof_of_work(block.clone());
        let data = pow.prepare_data(block.get_nonce());
        let hash = sha256_digest(data.as_slice());
        if hash != block.get_hash() {
            return false;
        }
        let hash_int = BigInt::from_bytes_be(Sign::Plus, hash.as_slice());
        hash_int < pow.target
    }

    /// Mining preimage: prev_hash || merkle_root || timestamp || target bits || nonce,
    /// integers big-endian 64-bit.
    fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let mut data_bytes = vec![];
        data_bytes.extend(self.block.get_pre_block_hash());
        data_bytes.extend(self.block.get_merkle_root());
        data_bytes.extend(self.block.get_timestamp().to_be_bytes());
        data_bytes.extend(TARGET_BITS.to_be_bytes());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes
    }

    /// Scan nonces from zero until the hash satisfies the target.
    pub fn run(&self) -> (i64, Vec<u8>) {
        // The nonce occupies the last 8 bytes of the preimage; patch it in
        // place instead of rebuilding the buffer sixteen million times.
        let mut data = self.prepare_data(0);
        let nonce_offset = data.len() - 8;

        info!("Mining a block with {} transactions", self.block.get_transactions().len());
        let mut nonce = 0;
        let mut hash = Vec::new();
        while nonce < MAX_NONCE {
            data[nonce_offset..].copy_from_slice(&nonce.to_be_bytes());
            hash = sha256_digest(data.as_slice());
            let hash_int = BigInt::from_bytes_be(Sign::Plus, hash.as_slice());

            if hash_int < self.target {
                info!("Mined block {}", HEXLOWER.encode(hash.as_slice()));
                break;
            }
            nonce += 1;
        }
        (nonce, hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::wallet::Wallet;

    fn test_block() -> Block {
        let address = Wallet::new().unwrap().get_address();
        let coinbase_tx = Transaction::new_coinbase_tx(&address, "").unwrap();
        Block::generate_genesis_block(&coinbase_tx).unwrap()
    }

    #[test]
    fn test_prepare_data_is_deterministic() {
        let block = test_block();
        let pow = ProofOfWork::new_proof_of_work(block);

        let data1 = pow.prepare_data(12345);
        let data2 = pow.prepare_data(12345);
        assert_eq!(data1, data2);

        let data3 = pow.prepare_data(54321);
        assert_ne!(data1, data3);
    }

    #[test]
    fn test_mined_block_validates() {
        let block = test_block();
        assert!(ProofOfWork::validate(&block));

        // The hash, as a big-endian integer, sits below the target.
        let hash_int = BigInt::from_bytes_be(Sign::Plus, block.get_hash());
        let mut target = BigInt::from(1);
        target.shl_assign(256 - TARGET_BITS as u32);
        assert!(hash_int < target);
    }

    #[test]
    fn test_tampered_nonce_fails_validation() {
        let mut block = test_block();
        block.set_nonce_for_test(block.get_nonce() + 1);
        assert!(!ProofOfWork::validate(&block));
    }
}
