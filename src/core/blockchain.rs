use crate::core::{Block, Transaction};
use crate::error::{BlockchainError, Result};
use crate::wallet::Signer;
use data_encoding::HEXLOWER;
use log::info;
use sled::{Db, Tree};
use std::collections::HashMap;
use std::env::current_dir;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

const BLOCKS_TREE: &str = "blocks";
const LAST_HASH_KEY: &str = "l";

/// How long to wait for another process to release the store
const DB_LOCK_TIMEOUT: Duration = Duration::from_secs(2);
const DB_LOCK_RETRY: Duration = Duration::from_millis(50);

/// The durable chain store: `block hash -> serialized block` plus a single
/// tip pointer, with the tip also cached in memory. Write operations go
/// through sled tree transactions so a block and the tip move together.
///
/// Cloning shares the underlying database handle; concurrent readers are
/// fine and writes are serialized by sled.
#[derive(Clone)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<Vec<u8>>>,
    db: Db,
    read_only: bool,
}

fn node_db_path(node_id: &str) -> Result<PathBuf> {
    Ok(current_dir()?.join(format!("blockchain_{node_id}.db")))
}

/// Open the sled database, retrying for a bounded time while another
/// process holds the file lock.
fn open_db(path: &Path) -> Result<Db> {
    let deadline = Instant::now() + DB_LOCK_TIMEOUT;
    loop {
        match sled::open(path) {
            Ok(db) => return Ok(db),
            Err(sled::Error::Io(e)) if e.to_string().contains("lock") => {
                if Instant::now() >= deadline {
                    return Err(BlockchainError::Locked(format!(
                        "{}: timeout (if a node is running with the same NODE_ID, stop it and retry)",
                        path.display()
                    )));
                }
                thread::sleep(DB_LOCK_RETRY);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

impl Blockchain {
    /// Create a brand-new chain whose genesis reward goes to `address`.
    /// Fails if the database for this node already exists.
    pub fn create(address: &str, node_id: &str) -> Result<Blockchain> {
        Self::create_with_path(address, &node_db_path(node_id)?)
    }

    pub fn create_with_path(address: &str, db_path: &Path) -> Result<Blockchain> {
        if !crate::wallet::validate_address(address) {
            return Err(BlockchainError::InvalidAddress(address.to_string()));
        }
        if db_path.exists() {
            return Err(BlockchainError::AlreadyExists(format!(
                "blockchain database already exists at {}",
                db_path.display()
            )));
        }

        let db = open_db(db_path)?;
        let blocks_tree = db.open_tree(BLOCKS_TREE)?;

        info!("Creating genesis block for address {address}");
        let coinbase_tx = Transaction::new_coinbase_tx(address, "Genesis")?;
        let genesis = Block::generate_genesis_block(&coinbase_tx)?;
        Self::update_blocks_tree(&blocks_tree, &genesis)?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(genesis.get_hash().to_vec())),
            db,
            read_only: false,
        })
    }

    /// Open an existing chain; fails if the database or its tip is missing.
    pub fn open(node_id: &str) -> Result<Blockchain> {
        Self::open_with_path(&node_db_path(node_id)?, false)
    }

    /// Open an existing chain for queries only; write operations refuse.
    pub fn open_read_only(node_id: &str) -> Result<Blockchain> {
        Self::open_with_path(&node_db_path(node_id)?, true)
    }

    pub fn open_with_path(db_path: &Path, read_only: bool) -> Result<Blockchain> {
        if !db_path.exists() {
            return Err(BlockchainError::NotFound(
                "no existing blockchain database found; run createblockchain first".to_string(),
            ));
        }

        let db = open_db(db_path)?;
        let blocks_tree = db.open_tree(BLOCKS_TREE)?;
        let tip_hash = blocks_tree
            .get(LAST_HASH_KEY)?
            .map(|v| v.to_vec())
            .ok_or_else(|| {
                BlockchainError::NotFound(
                    "blockchain database has no blocks; run createblockchain first".to_string(),
                )
            })?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            db,
            read_only,
        })
    }

    /// Open or create the database without creating a genesis block.
    /// The tip stays empty until blocks arrive; used by nodes that expect
    /// to sync from peers.
    pub fn init(node_id: &str) -> Result<Blockchain> {
        Self::init_with_path(&node_db_path(node_id)?)
    }

    pub fn init_with_path(db_path: &Path) -> Result<Blockchain> {
        let db = open_db(db_path)?;
        let blocks_tree = db.open_tree(BLOCKS_TREE)?;
        let tip_hash = blocks_tree
            .get(LAST_HASH_KEY)?
            .map(|v| v.to_vec())
            .unwrap_or_default();

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            db,
            read_only: false,
        })
    }

    /// Store `block` and point the tip at it, atomically.
    fn update_blocks_tree(blocks_tree: &Tree, block: &Block) -> Result<()> {
        let block_data = block.serialize()?;
        blocks_tree
            .transaction(|tx_db| {
                tx_db.insert(block.get_hash(), block_data.as_slice())?;
                tx_db.insert(LAST_HASH_KEY, block.get_hash())?;
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                BlockchainError::Database(format!("Failed to update blocks tree: {e}"))
            })?;
        Ok(())
    }

    fn blocks_tree(&self) -> Result<Tree> {
        Ok(self.db.open_tree(BLOCKS_TREE)?)
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(BlockchainError::Database(
                "blockchain database opened in read-only mode".to_string(),
            ));
        }
        Ok(())
    }

    pub fn get_tip_hash(&self) -> Vec<u8> {
        self.tip_hash
            .read()
            .expect("Failed to acquire read lock on tip_hash - this should never happen")
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &[u8]) {
        let mut tip_hash = self
            .tip_hash
            .write()
            .expect("Failed to acquire write lock on tip_hash - this should never happen");
        *tip_hash = new_tip_hash.to_vec();
    }

    /// Verify, assemble, mine, and persist a block of transactions on top
    /// of the current tip. Returns the mined block.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        self.check_writable()?;

        for (idx, transaction) in transactions.iter().enumerate() {
            if !self.verify_transaction(transaction)? {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "invalid transaction at index {idx}"
                )));
            }
        }

        let block = Block::new_block(transactions, &self.get_tip_hash())?;
        let blocks_tree = self.blocks_tree()?;
        Self::update_blocks_tree(&blocks_tree, &block)?;
        self.set_tip_hash(block.get_hash());

        info!(
            "Mined block {} with {} transactions",
            HEXLOWER.encode(block.get_hash()),
            transactions.len()
        );
        Ok(block)
    }

    /// Store a serialized block received from a peer.
    ///
    /// Linear-extension rule: the tip moves only when the chain is empty or
    /// the block's previous hash equals the current tip; any other block is
    /// stored but leaves the tip alone.
    pub fn put_block(&self, block_data: &[u8]) -> Result<()> {
        self.check_writable()?;

        let block = Block::deserialize(block_data)
            .map_err(|e| BlockchainError::Corrupt(format!("undecodable block: {e}")))?;

        let blocks_tree = self.blocks_tree()?;
        blocks_tree
            .transaction(|tx_db| {
                if tx_db.get(block.get_hash())?.is_none() {
                    tx_db.insert(block.get_hash(), block_data)?;
                }

                let current_tip = tx_db.get(LAST_HASH_KEY)?;
                let extends_tip = match &current_tip {
                    None => true,
                    Some(tip) if tip.is_empty() => true,
                    Some(tip) => block.get_pre_block_hash() == tip.as_ref(),
                };
                if extends_tip {
                    tx_db.insert(LAST_HASH_KEY, block.get_hash())?;
                }
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                BlockchainError::Database(format!("Failed to put block: {e}"))
            })?;

        // Re-read the committed tip into the in-memory cache.
        if let Some(tip) = blocks_tree.get(LAST_HASH_KEY)? {
            self.set_tip_hash(tip.as_ref());
        }
        Ok(())
    }

    /// First transaction with the given id, scanning tip to genesis
    pub fn find_transaction(&self, txid: &[u8]) -> Option<Transaction> {
        let mut iterator = self.iterator();
        while let Some(block) = iterator.next() {
            for transaction in block.get_transactions() {
                if txid.eq(transaction.get_id()) {
                    return Some(transaction.clone());
                }
            }
        }
        None
    }

    /// Collect every transaction this one references, keyed by hex txid.
    /// A missing reference is an error: the caller cannot reason about the
    /// transaction without it.
    fn prev_transactions(&self, tx: &Transaction) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        for vin in tx.get_vin() {
            let prev_tx = self.find_transaction(vin.get_txid()).ok_or_else(|| {
                BlockchainError::InvalidTransaction(format!(
                    "referenced transaction {} not found",
                    HEXLOWER.encode(vin.get_txid())
                ))
            })?;
            prev_txs.insert(HEXLOWER.encode(prev_tx.get_id()), prev_tx);
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, signer: &dyn Signer) -> Result<()> {
        let prev_txs = self.prev_transactions(tx)?;
        tx.sign(signer, &prev_txs)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.prev_transactions(tx)?;
        tx.verify(&prev_txs)
    }

    pub fn has_block(&self, block_hash: &[u8]) -> Result<bool> {
        Ok(self.blocks_tree()?.get(block_hash)?.is_some())
    }

    /// Serialized block bytes for a hash
    pub fn get_block(&self, block_hash: &[u8]) -> Result<Vec<u8>> {
        self.blocks_tree()?
            .get(block_hash)?
            .map(|v| v.to_vec())
            .ok_or_else(|| {
                BlockchainError::NotFound(format!(
                    "block {} not found",
                    HEXLOWER.encode(block_hash)
                ))
            })
    }

    /// All block hashes in chain order, genesis first
    pub fn get_block_hashes(&self) -> Vec<Vec<u8>> {
        let mut hashes = vec![];
        let mut iterator = self.iterator();
        while let Some(block) = iterator.next() {
            hashes.push(block.get_hash().to_vec());
        }
        hashes.reverse();
        hashes
    }

    /// Number of blocks from tip to genesis; an unsynced chain has height 0
    pub fn best_height(&self) -> usize {
        let mut height = 0;
        let mut iterator = self.iterator();
        while iterator.next().is_some() {
            height += 1;
        }
        height
    }

    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator::new(self.get_tip_hash(), self.db.clone())
    }
}

/// Walks the chain tip to genesis by following previous-block hashes.
/// Stops at the genesis block (empty previous hash) or at a hash the store
/// does not know, whichever comes first.
pub struct BlockchainIterator {
    db: Db,
    current_hash: Vec<u8>,
}

impl BlockchainIterator {
    fn new(tip_hash: Vec<u8>, db: Db) -> BlockchainIterator {
        BlockchainIterator {
            current_hash: tip_hash,
            db,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Block> {
        if self.current_hash.is_empty() {
            return None;
        }
        let block_tree = self.db.open_tree(BLOCKS_TREE).ok()?;
        let data = block_tree.get(self.current_hash.as_slice()).ok()??;
        let block = Block::deserialize(data.as_ref()).ok()?;
        self.current_hash = block.get_pre_block_hash().to_vec();
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;
    use tempfile::tempdir;

    fn test_chain(dir: &Path) -> (Blockchain, Wallet) {
        let wallet = Wallet::new().unwrap();
        let chain = Blockchain::create_with_path(&wallet.get_address(), &dir.join("chain")).unwrap();
        (chain, wallet)
    }

    #[test]
    fn test_create_then_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chain");

        let tip = {
            let (chain, _) = test_chain(dir.path());
            assert_eq!(chain.best_height(), 1);
            chain.get_tip_hash()
        };

        let chain = Blockchain::open_with_path(&path, false).unwrap();
        assert_eq!(chain.get_tip_hash(), tip);
        assert_eq!(chain.best_height(), 1);
    }

    #[test]
    fn test_create_refuses_existing_database() {
        let dir = tempdir().unwrap();
        let (_chain, wallet) = test_chain(dir.path());

        let again = Blockchain::create_with_path(&wallet.get_address(), &dir.path().join("chain"));
        assert!(matches!(again, Err(BlockchainError::AlreadyExists(_))));
    }

    #[test]
    fn test_init_starts_empty() {
        let dir = tempdir().unwrap();
        let chain = Blockchain::init_with_path(&dir.path().join("chain")).unwrap();
        assert!(chain.get_tip_hash().is_empty());
        assert_eq!(chain.best_height(), 0);
        assert!(chain.get_block_hashes().is_empty());
    }

    #[test]
    fn test_read_only_refuses_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chain");
        let coinbase = {
            let (chain, wallet) = test_chain(dir.path());
            drop(chain);
            Transaction::new_coinbase_tx(&wallet.get_address(), "").unwrap()
        };

        let chain = Blockchain::open_with_path(&path, true).unwrap();
        assert!(chain.mine_block(&[coinbase]).is_err());
    }

    #[test]
    fn test_find_transaction_sees_genesis_coinbase() {
        let dir = tempdir().unwrap();
        let (chain, _) = test_chain(dir.path());

        let genesis = chain.iterator().next().unwrap();
        let coinbase_id = genesis.get_transactions()[0].get_id().to_vec();
        assert!(chain.find_transaction(&coinbase_id).is_some());
        assert!(chain.find_transaction(&[0u8; 32]).is_none());
    }

    #[test]
    fn test_block_hashes_are_genesis_first() {
        let dir = tempdir().unwrap();
        let (chain, wallet) = test_chain(dir.path());

        let coinbase = Transaction::new_coinbase_tx(&wallet.get_address(), "").unwrap();
        let second = chain.mine_block(&[coinbase]).unwrap();

        let hashes = chain.get_block_hashes();
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[1], second.get_hash());
        assert_eq!(chain.get_tip_hash(), second.get_hash().to_vec());
        assert_eq!(chain.best_height(), 2);
    }
}
