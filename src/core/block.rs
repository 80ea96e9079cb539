use crate::core::{MerkleTree, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    timestamp: i64,
    transactions: Vec<Transaction>,
    pre_block_hash: Vec<u8>,
    hash: Vec<u8>,
    nonce: i64,
    merkle_root: Vec<u8>,
}

impl Block {
    /// Assemble and mine a block on top of `pre_block_hash`.
    pub fn new_block(transactions: &[Transaction], pre_block_hash: &[u8]) -> Result<Block> {
        Self::mine(transactions, pre_block_hash, current_timestamp()?)
    }

    /// The genesis block carries a fixed zero timestamp and an empty
    /// previous hash, so its hash is deterministic for a given coinbase.
    pub fn generate_genesis_block(coinbase: &Transaction) -> Result<Block> {
        Self::mine(&[coinbase.clone()], &[], 0)
    }

    fn mine(transactions: &[Transaction], pre_block_hash: &[u8], timestamp: i64) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidTransaction(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let merkle_root = Self::hash_transactions(transactions);

        let mut block = Block {
            timestamp,
            transactions: transactions.to_vec(),
            pre_block_hash: pre_block_hash.to_vec(),
            hash: vec![],
            nonce: 0,
            merkle_root,
        };

        let pow = ProofOfWork::new_proof_of_work(block.clone());
        let (nonce, hash) = pow.run();
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    /// Merkle root over the ordered transaction ids
    fn hash_transactions(transactions: &[Transaction]) -> Vec<u8> {
        let tx_ids: Vec<Vec<u8>> = transactions
            .iter()
            .map(|tx| tx.get_id().to_vec())
            .collect();
        MerkleTree::new(&tx_ids).root_hash().to_vec()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> &[u8] {
        self.pre_block_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_merkle_root(&self) -> &[u8] {
        self.merkle_root.as_slice()
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    /// Recompute the Merkle root and compare with the committed one
    pub fn verify_merkle_root(&self) -> bool {
        Self::hash_transactions(&self.transactions) == self.merkle_root
    }

    #[cfg(test)]
    pub fn set_nonce_for_test(&mut self, nonce: i64) {
        self.nonce = nonce;
    }
}
