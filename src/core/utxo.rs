//! Unspent-output queries, computed by walking the chain.
//!
//! The walk runs tip to genesis, recording spent output indexes as inputs
//! are encountered. Any input spending an output appears in a later block
//! than the output it consumes, so it is always seen first.

use crate::core::{Blockchain, TXOutput, Transaction};
use data_encoding::HEXLOWER;
use std::collections::HashMap;

impl Blockchain {
    /// Transactions that still hold at least one unspent output locked to
    /// the key, tip to genesis, each paired with the indexes of those
    /// outputs.
    pub fn find_unspent_transactions(&self, pub_key_hash: &[u8]) -> Vec<(Transaction, Vec<usize>)> {
        let mut unspent_txs: Vec<(Transaction, Vec<usize>)> = vec![];
        let mut spent_txos: HashMap<String, Vec<i64>> = HashMap::new();

        let mut iterator = self.iterator();
        while let Some(block) = iterator.next() {
            for tx in block.get_transactions() {
                let txid_hex = HEXLOWER.encode(tx.get_id());

                let mut unspent_outs = vec![];
                for (out_idx, out) in tx.get_vout().iter().enumerate() {
                    if let Some(spent) = spent_txos.get(txid_hex.as_str()) {
                        if spent.contains(&(out_idx as i64)) {
                            continue;
                        }
                    }
                    if out.is_locked_with_key(pub_key_hash) {
                        unspent_outs.push(out_idx);
                    }
                }
                if !unspent_outs.is_empty() {
                    unspent_txs.push((tx.clone(), unspent_outs));
                }

                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    if txin.uses_key(pub_key_hash) {
                        spent_txos
                            .entry(HEXLOWER.encode(txin.get_txid()))
                            .or_default()
                            .push(txin.get_vout());
                    }
                }
            }
        }

        unspent_txs
    }

    /// All unspent outputs locked to the key, flattened
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Vec<TXOutput> {
        self.find_unspent_transactions(pub_key_hash)
            .into_iter()
            .flat_map(|(tx, unspent_outs)| {
                unspent_outs
                    .into_iter()
                    .map(move |idx| tx.get_vout()[idx].clone())
            })
            .collect()
    }

    /// Greedily gather unspent outputs until `amount` is covered, in
    /// discovery order. Returns the accumulated value and the selected
    /// output indexes keyed by hex txid; the caller treats a shortfall as
    /// insufficient funds.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> (u64, HashMap<String, Vec<usize>>) {
        let mut unspent_outputs: HashMap<String, Vec<usize>> = HashMap::new();
        let mut accumulated = 0;

        'gather: for (tx, unspent_outs) in self.find_unspent_transactions(pub_key_hash) {
            let txid_hex = HEXLOWER.encode(tx.get_id());
            for out_idx in unspent_outs {
                accumulated += tx.get_vout()[out_idx].get_value();
                unspent_outputs
                    .entry(txid_hex.clone())
                    .or_default()
                    .push(out_idx);
                if accumulated >= amount {
                    break 'gather;
                }
            }
        }

        (accumulated, unspent_outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Blockchain;
    use crate::wallet::{hash_pub_key, Wallet};
    use tempfile::tempdir;

    #[test]
    fn test_genesis_utxo_and_balance() {
        let dir = tempdir().unwrap();
        let wallet = Wallet::new().unwrap();
        let chain =
            Blockchain::create_with_path(&wallet.get_address(), &dir.path().join("chain")).unwrap();

        let pkh = hash_pub_key(wallet.get_public_key());
        let utxos = chain.find_utxo(&pkh);
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos.iter().map(TXOutput::get_value).sum::<u64>(), 10);

        // A key that never appears owns nothing.
        let stranger = hash_pub_key(Wallet::new().unwrap().get_public_key());
        assert!(chain.find_utxo(&stranger).is_empty());
    }

    #[test]
    fn test_spendable_outputs_accumulate_across_blocks() {
        let dir = tempdir().unwrap();
        let wallet = Wallet::new().unwrap();
        let address = wallet.get_address();
        let chain =
            Blockchain::create_with_path(&address, &dir.path().join("chain")).unwrap();

        let coinbase = Transaction::new_coinbase_tx(&address, "").unwrap();
        chain.mine_block(&[coinbase]).unwrap();

        let pkh = hash_pub_key(wallet.get_public_key());

        // 10 from genesis plus 10 from the second coinbase.
        let (accumulated, selected) = chain.find_spendable_outputs(&pkh, 15);
        assert_eq!(accumulated, 20);
        assert_eq!(selected.values().map(Vec::len).sum::<usize>(), 2);

        // A single output already covers a small amount.
        let (accumulated, selected) = chain.find_spendable_outputs(&pkh, 5);
        assert_eq!(accumulated, 10);
        assert_eq!(selected.values().map(Vec::len).sum::<usize>(), 1);

        // Shortfalls are reported, not errored.
        let (accumulated, _) = chain.find_spendable_outputs(&pkh, 100);
        assert_eq!(accumulated, 20);
    }
}
