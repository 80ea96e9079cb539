use clap::Parser;
use data_encoding::HEXLOWER;
use log::LevelFilter;
use minichain::network::{
    broadcast_new_block, get_balance_request, get_chain_request, send_tx_request, ChainBlock,
};
use minichain::{
    validate_address, Blockchain, Command, Opt, Server, Transaction, Wallets, GLOBAL_CONFIG,
};
use std::process;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt.command) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let node_id = GLOBAL_CONFIG.node_id();

    match command {
        Command::Createwallet => {
            let mut wallets = Wallets::new()?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::new()?;
            for address in wallets.get_addresses() {
                println!("{address}");
            }
        }
        Command::Createblockchain { address } => {
            Blockchain::create(&address, &node_id)?;
            println!("Done! Created a new blockchain.");
        }
        Command::Printchain => {
            // A running node owns the database; ask it first and fall back
            // to a direct read-only open for offline use.
            match get_chain_request(&node_id) {
                Ok((blocks, message)) => {
                    if !message.is_empty() {
                        println!("{message}");
                    }
                    for block in &blocks {
                        print_chain_block(block);
                    }
                }
                Err(_) => {
                    let chain = Blockchain::open_read_only(&node_id)?;
                    let mut iterator = chain.iterator();
                    let mut index = 0;
                    while let Some(block) = iterator.next() {
                        let tx_ids = block
                            .get_transactions()
                            .iter()
                            .map(|tx| tx.get_id().to_vec())
                            .collect();
                        print_chain_block(&ChainBlock {
                            index,
                            timestamp: block.get_timestamp(),
                            prev_hash: block.get_pre_block_hash().to_vec(),
                            hash: block.get_hash().to_vec(),
                            nonce: block.get_nonce(),
                            merkle: block.get_merkle_root().to_vec(),
                            tx_ids,
                        });
                        index += 1;
                    }
                }
            }
        }
        Command::GetBalance { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }
            let balance = match get_balance_request(&node_id, &address) {
                Ok(balance) => balance,
                Err(_) => {
                    let chain = Blockchain::open_read_only(&node_id)?;
                    let pub_key_hash = minichain::pub_key_hash_from_address(&address)
                        .ok_or_else(|| format!("Invalid address: {address}"))?;
                    chain
                        .find_utxo(&pub_key_hash)
                        .iter()
                        .map(|out| out.get_value())
                        .sum()
                }
            };
            println!("Balance of '{address}': {balance}");
        }
        Command::Send { from, to, amount } => {
            if !validate_address(&from) {
                return Err(format!("Invalid sender address: {from}").into());
            }
            if !validate_address(&to) {
                return Err(format!("Invalid recipient address: {to}").into());
            }
            if amount == 0 {
                return Err("Amount must be positive".into());
            }

            match send_tx_request(&node_id, &from, &to, amount) {
                Ok(message) => println!("{message}"),
                Err(e) => {
                    // No node answered; mine locally and announce the result.
                    println!("Send via running node failed: {e}");
                    println!("Falling back to local mining.");
                    let wallets = Wallets::new()?;
                    let chain = Blockchain::open(&node_id)?;
                    let tx = Transaction::new_utxo_transaction(&from, &to, amount, &chain, &wallets)?;
                    let coinbase = Transaction::new_coinbase_tx(&from, "")?;
                    let block = chain.mine_block(&[coinbase, tx])?;
                    broadcast_new_block(&format!("localhost:{node_id}"), block.get_hash());
                    println!("Success! Transaction mined into a new block.");
                }
            }
        }
        Command::StartNode { miner } => {
            if let Some(addr) = &miner {
                if !validate_address(addr) {
                    return Err(format!("Invalid miner address: {addr}").into());
                }
                println!("Mining is on. Address to receive rewards: {addr}");
            }
            let server = Server::start(&node_id, miner)?;
            server.run()?;
        }
    }
    Ok(())
}

fn print_chain_block(block: &ChainBlock) {
    println!("===== Block {} =====", block.index);
    println!("Timestamp: {}", block.timestamp);
    println!("Prev. hash: {}", HEXLOWER.encode(&block.prev_hash));
    println!("Hash: {}", HEXLOWER.encode(&block.hash));
    println!("Nonce: {}", block.nonce);
    println!("Merkle: {}", HEXLOWER.encode(&block.merkle));
    println!("Tx count: {}", block.tx_ids.len());
    for tx_id in &block.tx_ids {
        println!("  TxID: {}", HEXLOWER.encode(tx_id));
    }
    println!();
}
