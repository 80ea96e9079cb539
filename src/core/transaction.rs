use crate::core::Blockchain;
use crate::error::{BlockchainError, Result};
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign_verify, serialize, sha256_digest,
};
use crate::wallet::{hash_pub_key, pub_key_hash_from_address, validate_address, Signer, Wallets};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Block reward minted by every coinbase transaction
const SUBSIDY: u64 = 10;

/// Sentinel output index marking a coinbase input
const COINBASE_VOUT: i64 = -1;

/// A reference to a previous transaction output, plus the proof that the
/// spender may consume it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: i64,
    signature: Vec<u8>,
    pub_key: Vec<u8>,
}

impl TXInput {
    pub fn new(txid: &[u8], vout: i64) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i64 {
        self.vout
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    /// Whether this input was created by the holder of `pub_key_hash`
    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()).eq(pub_key_hash)
    }
}

/// An amount locked to the holder of a public key hash
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        let mut output = TXOutput {
            value,
            pub_key_hash: vec![],
        };
        output.lock(address)?;
        Ok(output)
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    fn lock(&mut self, address: &str) -> Result<()> {
        let pub_key_hash = pub_key_hash_from_address(address)
            .ok_or_else(|| BlockchainError::InvalidAddress(address.to_string()))?;
        self.pub_key_hash = pub_key_hash;
        Ok(())
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

/// A transfer of value: inputs consuming previous outputs, outputs locking
/// the value to new keys. `id` is the SHA-256 of the canonical serialization
/// with the id field cleared, computed once before signing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// The block-creation transaction: one sentinel input carrying `data`,
    /// one output minting the subsidy to `to`.
    pub fn new_coinbase_tx(to: &str, data: &str) -> Result<Transaction> {
        let data = if data.is_empty() {
            format!("Coinbase to {to}")
        } else {
            data.to_string()
        };

        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: vec![],
            pub_key: data.into_bytes(),
        };
        let tx_output = TXOutput::new(SUBSIDY, to)?;

        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![tx_output],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Build, fund, and sign a spend of `amount` from `from` to `to`.
    ///
    /// Spendable outputs are selected greedily from the chain; any surplus
    /// returns to the sender as change.
    pub fn new_utxo_transaction(
        from: &str,
        to: &str,
        amount: u64,
        chain: &Blockchain,
        wallets: &Wallets,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::InvalidTransaction(
                "Amount must be positive".to_string(),
            ));
        }
        if !validate_address(from) {
            return Err(BlockchainError::InvalidAddress(from.to_string()));
        }
        if !validate_address(to) {
            return Err(BlockchainError::InvalidAddress(to.to_string()));
        }

        let wallet = wallets
            .get_wallet(from)
            .ok_or_else(|| BlockchainError::WalletNotFound(from.to_string()))?;
        let from_pub_key_hash = hash_pub_key(wallet.get_public_key());

        let (accumulated, valid_outputs) =
            chain.find_spendable_outputs(from_pub_key_hash.as_slice(), amount);
        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid_hex, outs) in valid_outputs {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::InvalidTransaction(format!("Invalid transaction ID: {e}"))
            })?;
            for out in outs {
                inputs.push(TXInput {
                    txid: txid.clone(),
                    vout: out as i64,
                    signature: vec![],
                    pub_key: wallet.get_public_key().to_vec(),
                });
            }
        }

        let mut outputs = vec![TXOutput::new(amount, to)?];
        let change = accumulated - amount;
        if change > 0 {
            outputs.push(TXOutput::new(change, from)?);
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;

        chain.sign_transaction(&mut tx, wallet)?;

        // Sanity: every input must carry the sender's key.
        for vin in &tx.vin {
            if !hash_pub_key(vin.get_pub_key()).eq(&from_pub_key_hash) {
                return Err(BlockchainError::InvalidTransaction(
                    "Input public key does not match sender".to_string(),
                ));
            }
        }

        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    /// SHA-256 of the canonical serialization with the id cleared
    fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(&tx_copy.serialize()?))
    }

    /// A clone whose inputs carry neither signature nor public key
    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput::new(input.get_txid(), input.get_vout()))
            .collect();
        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: self.vout.clone(),
        }
    }

    /// The per-input signing preimage: the trimmed copy with this input's
    /// `pub_key` replaced by the previous output's key hash, hashed. Sign
    /// and verify both derive their digest here, so the two can never drift.
    fn signing_digest(&self, input_idx: usize, prev_pub_key_hash: &[u8]) -> Result<Vec<u8>> {
        let mut tx_copy = self.trimmed_copy();
        tx_copy.vin[input_idx].pub_key = prev_pub_key_hash.to_vec();
        tx_copy.hash()
    }

    /// DER-sign every input against its referenced previous output.
    /// No-op for coinbase. `prev_txs` must hold every referenced
    /// transaction, keyed by hex txid.
    pub fn sign(
        &mut self,
        signer: &dyn Signer,
        prev_txs: &HashMap<String, Transaction>,
    ) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        for idx in 0..self.vin.len() {
            let prev_tx = Self::lookup_prev_tx(prev_txs, &self.vin[idx])?;
            let prev_output = Self::referenced_output(&prev_tx, &self.vin[idx])?;
            let digest = self.signing_digest(idx, prev_output.get_pub_key_hash())?;
            self.vin[idx].signature = signer.sign(&digest)?;
        }
        Ok(())
    }

    /// Check every input's signature. Coinbase verifies trivially; a missing
    /// previous transaction is an error rather than a `false` (callers must
    /// supply the full referenced set).
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        for idx in 0..self.vin.len() {
            let vin = &self.vin[idx];
            let prev_tx = Self::lookup_prev_tx(prev_txs, vin)?;
            let prev_output = match Self::referenced_output(&prev_tx, vin) {
                Ok(out) => out,
                Err(_) => return Ok(false),
            };

            let digest = self.signing_digest(idx, prev_output.get_pub_key_hash())?;
            if !ecdsa_p256_sha256_sign_verify(vin.get_pub_key(), vin.get_signature(), &digest) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn lookup_prev_tx(
        prev_txs: &HashMap<String, Transaction>,
        vin: &TXInput,
    ) -> Result<Transaction> {
        let txid_hex = HEXLOWER.encode(vin.get_txid());
        prev_txs
            .get(txid_hex.as_str())
            .filter(|prev| !prev.get_id().is_empty())
            .cloned()
            .ok_or_else(|| {
                BlockchainError::InvalidTransaction(format!(
                    "Previous transaction {txid_hex} is not correct"
                ))
            })
    }

    fn referenced_output<'a>(prev_tx: &'a Transaction, vin: &TXInput) -> Result<&'a TXOutput> {
        let idx = usize::try_from(vin.get_vout()).map_err(|_| {
            BlockchainError::InvalidTransaction("Negative output index".to_string())
        })?;
        prev_tx.vout.get(idx).ok_or_else(|| {
            BlockchainError::InvalidTransaction("Output index out of range".to_string())
        })
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    // A coinbase paying `wallet`, plus a spend of its output signed by `signer`.
    fn spend_fixture(wallet: &Wallet, signer: &Wallet) -> (HashMap<String, Transaction>, Transaction) {
        let prev_tx = Transaction::new_coinbase_tx(&wallet.get_address(), "").unwrap();
        let recipient = Wallet::new().unwrap().get_address();

        let mut tx = Transaction {
            id: vec![],
            vin: vec![TXInput {
                txid: prev_tx.get_id().to_vec(),
                vout: 0,
                signature: vec![],
                pub_key: wallet.get_public_key().to_vec(),
            }],
            vout: vec![TXOutput::new(SUBSIDY, &recipient).unwrap()],
        };
        tx.id = tx.hash().unwrap();

        let mut prev_txs = HashMap::new();
        prev_txs.insert(HEXLOWER.encode(prev_tx.get_id()), prev_tx);
        tx.sign(signer, &prev_txs).unwrap();
        (prev_txs, tx)
    }

    #[test]
    fn test_coinbase_shape() {
        let address = Wallet::new().unwrap().get_address();
        let tx = Transaction::new_coinbase_tx(&address, "Genesis").unwrap();

        assert!(tx.is_coinbase());
        assert_eq!(tx.get_vin().len(), 1);
        assert_eq!(tx.get_vin()[0].get_vout(), -1);
        assert!(tx.get_vin()[0].get_txid().is_empty());
        assert_eq!(tx.get_vout().len(), 1);
        assert_eq!(tx.get_vout()[0].get_value(), SUBSIDY);
    }

    #[test]
    fn test_id_is_hash_of_unsigned_shape() {
        let wallet = Wallet::new().unwrap();
        let (_, tx) = spend_fixture(&wallet, &wallet);

        // Clearing the id and rehashing reproduces the id only for the
        // unsigned shape: signatures are excluded from the trimmed copy,
        // not from the transaction itself.
        let mut unsigned = tx.clone();
        for vin in &mut unsigned.vin {
            vin.signature = vec![];
        }
        assert_eq!(unsigned.hash().unwrap(), tx.get_id());
    }

    #[test]
    fn test_sign_then_verify() {
        let wallet = Wallet::new().unwrap();
        let (prev_txs, tx) = spend_fixture(&wallet, &wallet);
        assert!(tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_tampered_output_fails_verification() {
        let wallet = Wallet::new().unwrap();
        let (prev_txs, mut tx) = spend_fixture(&wallet, &wallet);

        tx.vout[0].pub_key_hash[0] ^= 0x01;
        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_foreign_signature_fails_verification() {
        let wallet = Wallet::new().unwrap();
        let forger = Wallet::new().unwrap();
        // Input claims the owner's public key but is signed by someone else.
        let (prev_txs, tx) = spend_fixture(&wallet, &forger);
        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_verify_requires_prev_txs() {
        let wallet = Wallet::new().unwrap();
        let (_, tx) = spend_fixture(&wallet, &wallet);
        assert!(tx.verify(&HashMap::new()).is_err());
    }

    #[test]
    fn test_serialization_round_trip() {
        let address = Wallet::new().unwrap().get_address();
        let tx = Transaction::new_coinbase_tx(&address, "round trip").unwrap();
        let decoded = Transaction::deserialize(&tx.serialize().unwrap()).unwrap();
        assert_eq!(decoded.get_id(), tx.get_id());
    }
}
