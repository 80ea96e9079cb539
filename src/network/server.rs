use crate::core::{Blockchain, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::{NodeContext, BOOTSTRAP_NODE, KNOWN_NODES};
use crate::utils::{decode_from_reader, deserialize, encode_into_writer, serialize};
use crate::wallet::{pub_key_hash_from_address, validate_address, Wallets};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::io::BufReader;
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const PROTOCOL_VERSION: usize = 1;

/// Read deadline for inbound connections
const ACCEPT_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Dial timeout for outbound connections
const DIAL_TIMEOUT: Duration = Duration::from_secs(3);
/// How long an RPC caller waits for its reply
const REPLY_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// The one wire frame: a command name plus the bincode encoding of that
/// command's payload record. Exactly one message per connection; RPC-style
/// commands answer with one reply message on the same connection.
#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Message {
    pub command: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct Version {
    version: usize,
    best_height: usize,
    addr_from: String,
}

#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct GetBlocks {
    addr_from: String,
}

#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct Inv {
    addr_from: String,
    kind: String,
    items: Vec<Vec<u8>>,
}

#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct GetData {
    addr_from: String,
    kind: String,
    id: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct BlockData {
    addr_from: String,
    block: Vec<u8>,
}

/// RPC request asking the node to construct, sign, and mine a transaction
/// using its local wallet file.
#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct TxRequest {
    addr_from: String,
    from: String,
    to: String,
    amount: u64,
}

#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct BalanceRequest {
    addr_from: String,
    address: String,
}

#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct ChainRequest {
    addr_from: String,
}

#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct OpResult {
    ok: bool,
    message: String,
}

#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct BalanceResponse {
    ok: bool,
    message: String,
    balance: u64,
}

/// One block flattened for the `getchain` reply; index 0 is the tip.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct ChainBlock {
    pub index: usize,
    pub timestamp: i64,
    pub prev_hash: Vec<u8>,
    pub hash: Vec<u8>,
    pub nonce: i64,
    pub merkle: Vec<u8>,
    pub tx_ids: Vec<Vec<u8>>,
}

#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct ChainResponse {
    ok: bool,
    message: String,
    blocks: Vec<ChainBlock>,
}

fn message<T: Serialize + bincode::Encode>(command: &str, payload: &T) -> Result<Message> {
    Ok(Message {
        command: command.to_string(),
        payload: serialize(payload)?,
    })
}

/// P2P server: one accept loop, one thread per inbound connection.
pub struct Server {
    blockchain: Blockchain,
    ctx: Arc<NodeContext>,
}

impl Server {
    pub fn new(blockchain: Blockchain, addr: String, miner_addr: Option<String>) -> Server {
        Server {
            blockchain,
            ctx: Arc::new(NodeContext::new(addr, miner_addr)),
        }
    }

    /// Open (or create, for syncing peers) the node's chain database and
    /// build the server for `localhost:<node_id>`.
    pub fn start(node_id: &str, miner_addr: Option<String>) -> Result<Server> {
        let blockchain = Blockchain::init(node_id)?;
        let addr = format!("localhost:{node_id}");
        Ok(Server::new(blockchain, addr, miner_addr))
    }

    /// Bind, announce to the bootstrap, then accept connections forever.
    pub fn run(&self) -> Result<()> {
        let addr = self.ctx.addr().to_string();
        let listener = TcpListener::bind(addr.as_str())
            .map_err(|e| BlockchainError::Transport(format!("Failed to bind to {addr}: {e}")))?;

        match self.ctx.miner_addr() {
            Some(miner) => info!("Node {addr} listening (miner={miner})"),
            None => info!("Node {addr} listening"),
        }

        if !self.ctx.is_bootstrap() {
            send_version(BOOTSTRAP_NODE, &self.blockchain, &self.ctx);
        }

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let blockchain = self.blockchain.clone();
                    let ctx = Arc::clone(&self.ctx);
                    thread::spawn(move || {
                        if let Err(e) = handle_connection(blockchain, ctx, stream) {
                            error!("Error handling connection: {e}");
                        }
                    });
                }
                Err(e) => error!("Error accepting connection: {e}"),
            }
        }

        Ok(())
    }
}

fn handle_connection(
    blockchain: Blockchain,
    ctx: Arc<NodeContext>,
    stream: TcpStream,
) -> Result<()> {
    stream
        .set_read_timeout(Some(ACCEPT_READ_TIMEOUT))
        .map_err(|e| BlockchainError::Transport(format!("Failed to set read timeout: {e}")))?;

    let mut reader = BufReader::new(stream.try_clone().map_err(|e| {
        BlockchainError::Transport(format!("Failed to clone connection handle: {e}"))
    })?);
    let msg: Message = decode_from_reader(&mut reader)?;
    info!("Received {} message", msg.command);

    match msg.command.as_str() {
        "version" => handle_version(&msg.payload, &blockchain, &ctx)?,
        "getblocks" => handle_get_blocks(&msg.payload, &blockchain, &ctx)?,
        "inv" => handle_inv(&msg.payload, &blockchain, &ctx)?,
        "getdata" => handle_get_data(&msg.payload, &blockchain, &ctx)?,
        "block" => handle_block(&msg.payload, &blockchain, &ctx)?,
        "sendtx" => handle_send_tx(&stream, &msg.payload, &blockchain, &ctx)?,
        "getbalance" => handle_get_balance(&stream, &msg.payload, &blockchain)?,
        "getchain" => handle_get_chain(&stream, &msg.payload, &blockchain)?,
        other => warn!("Ignoring unknown command {other}"),
    }

    let _ = stream.shutdown(Shutdown::Both);
    Ok(())
}

// ---- gossip handlers -------------------------------------------------------

fn handle_version(payload: &[u8], blockchain: &Blockchain, ctx: &NodeContext) -> Result<()> {
    let payload: Version = deserialize(payload)?;

    let my_best_height = blockchain.best_height();
    if my_best_height < payload.best_height {
        send_get_blocks(&payload.addr_from, ctx);
    } else if my_best_height > payload.best_height {
        send_version(&payload.addr_from, blockchain, ctx);
    }
    Ok(())
}

fn handle_get_blocks(payload: &[u8], blockchain: &Blockchain, ctx: &NodeContext) -> Result<()> {
    let payload: GetBlocks = deserialize(payload)?;
    send_inv(&payload.addr_from, "block", blockchain.get_block_hashes(), ctx);
    Ok(())
}

fn handle_inv(payload: &[u8], blockchain: &Blockchain, ctx: &NodeContext) -> Result<()> {
    let payload: Inv = deserialize(payload)?;
    if payload.kind != "block" {
        return Ok(());
    }

    // Queue the hashes we don't hold yet, then pull the first one.
    let mut missing = vec![];
    for hash in payload.items {
        if !blockchain.has_block(&hash)? {
            missing.push(hash);
        }
    }
    ctx.blocks_in_transit().replace(missing);

    if let Some(first) = ctx.blocks_in_transit().pop_front() {
        send_get_data(&payload.addr_from, "block", &first, ctx);
    }
    Ok(())
}

fn handle_get_data(payload: &[u8], blockchain: &Blockchain, ctx: &NodeContext) -> Result<()> {
    let payload: GetData = deserialize(payload)?;
    if payload.kind != "block" {
        return Ok(());
    }

    match blockchain.get_block(&payload.id) {
        Ok(block_bytes) => send_block(&payload.addr_from, block_bytes, ctx),
        Err(BlockchainError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }
    Ok(())
}

fn handle_block(payload: &[u8], blockchain: &Blockchain, ctx: &NodeContext) -> Result<()> {
    let payload: BlockData = deserialize(payload)?;
    blockchain.put_block(&payload.block)?;
    info!("Stored block from {}", payload.addr_from);

    if let Some(next) = ctx.blocks_in_transit().pop_front() {
        send_get_data(&payload.addr_from, "block", &next, ctx);
    } else if !ctx.is_bootstrap() {
        // Synced as far as this peer could take us; let the bootstrap
        // start another round if it still knows more.
        send_version(BOOTSTRAP_NODE, blockchain, ctx);
    }
    Ok(())
}

// ---- RPC handlers ----------------------------------------------------------

fn handle_send_tx(
    stream: &TcpStream,
    payload: &[u8],
    blockchain: &Blockchain,
    ctx: &NodeContext,
) -> Result<()> {
    let payload: TxRequest = deserialize(payload)?;

    if payload.amount == 0 {
        return send_result(stream, false, "amount must be > 0".to_string());
    }
    if !validate_address(&payload.from) || !validate_address(&payload.to) {
        return send_result(stream, false, "invalid from/to address".to_string());
    }

    let wallets = match Wallets::new() {
        Ok(wallets) => wallets,
        Err(e) => {
            return send_result(stream, false, format!("failed to load wallets: {e}"));
        }
    };

    // Who receives the coinbase: the configured miner, or the sender when
    // the node was started without --miner.
    let coinbase_to = ctx.miner_addr().unwrap_or(payload.from.as_str()).to_string();

    let mined = Transaction::new_utxo_transaction(
        &payload.from,
        &payload.to,
        payload.amount,
        blockchain,
        &wallets,
    )
    .and_then(|tx| {
        let coinbase = Transaction::new_coinbase_tx(&coinbase_to, "")?;
        blockchain.mine_block(&[coinbase, tx])
    });

    let new_block = match mined {
        Ok(block) => block,
        Err(e) => {
            return send_result(stream, false, format!("send failed: {e}"));
        }
    };

    broadcast_new_block(ctx.addr(), new_block.get_hash());

    let mut text = "Success! Transaction accepted and mined into a new block by node.".to_string();
    if ctx.miner_addr().is_none() {
        text.push_str(" (coinbase paid to sender because no --miner was set)");
    }
    send_result(stream, true, text)
}

fn handle_get_balance(stream: &TcpStream, payload: &[u8], blockchain: &Blockchain) -> Result<()> {
    let payload: BalanceRequest = deserialize(payload)?;

    let pub_key_hash = match pub_key_hash_from_address(&payload.address) {
        Some(pkh) => pkh,
        None => {
            let reply = BalanceResponse {
                ok: false,
                message: "invalid address".to_string(),
                balance: 0,
            };
            return send_reply(stream, &message("balance", &reply)?);
        }
    };

    let balance = blockchain
        .find_utxo(&pub_key_hash)
        .iter()
        .map(|out| out.get_value())
        .sum();

    let reply = BalanceResponse {
        ok: true,
        message: String::new(),
        balance,
    };
    send_reply(stream, &message("balance", &reply)?)
}

fn handle_get_chain(stream: &TcpStream, payload: &[u8], blockchain: &Blockchain) -> Result<()> {
    let _payload: ChainRequest = deserialize(payload)?;

    if blockchain.get_tip_hash().is_empty() {
        let reply = ChainResponse {
            ok: true,
            message: "chain is empty (no blocks yet)".to_string(),
            blocks: vec![],
        };
        return send_reply(stream, &message("chain", &reply)?);
    }

    let mut blocks = vec![];
    let mut iterator = blockchain.iterator();
    let mut index = 0;
    while let Some(block) = iterator.next() {
        let tx_ids = block
            .get_transactions()
            .iter()
            .map(|tx| tx.get_id().to_vec())
            .collect();
        blocks.push(ChainBlock {
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

    let reply = ChainResponse {
        ok: true,
        message: String::new(),
        blocks,
    };
    send_reply(stream, &message("chain", &reply)?)
}

fn send_result(stream: &TcpStream, ok: bool, text: String) -> Result<()> {
    let reply = OpResult { ok, message: text };
    send_reply(stream, &message("result", &reply)?)
}

fn send_reply(mut stream: &TcpStream, msg: &Message) -> Result<()> {
    encode_into_writer(msg, &mut stream)
}

// ---- outbound gossip -------------------------------------------------------

fn dial(addr: &str) -> Result<TcpStream> {
    let socket_addr = addr
        .to_socket_addrs()
        .map_err(|e| BlockchainError::Transport(format!("Invalid address {addr}: {e}")))?
        .next()
        .ok_or_else(|| BlockchainError::Transport(format!("Address {addr} did not resolve")))?;
    TcpStream::connect_timeout(&socket_addr, DIAL_TIMEOUT)
        .map_err(|e| BlockchainError::Transport(format!("Failed to connect to {addr}: {e}")))
}

/// Fire-and-forget gossip send; failures are logged, never propagated.
fn send_data(addr: &str, msg: Result<Message>) {
    let result = msg.and_then(|msg| {
        let mut stream = dial(addr)?;
        encode_into_writer(&msg, &mut stream)
    });
    if let Err(e) = result {
        warn!("Dropping gossip message to {addr}: {e}");
    }
}

/// Send one request and wait for its single reply
fn send_request(addr: &str, msg: &Message) -> Result<Message> {
    let mut stream = dial(addr)?;
    encode_into_writer(msg, &mut stream)?;
    stream
        .set_read_timeout(Some(REPLY_READ_TIMEOUT))
        .map_err(|e| BlockchainError::Transport(format!("Failed to set read timeout: {e}")))?;
    let mut reader = BufReader::new(stream);
    decode_from_reader(&mut reader)
}

fn send_version(addr: &str, blockchain: &Blockchain, ctx: &NodeContext) {
    let payload = Version {
        version: PROTOCOL_VERSION,
        best_height: blockchain.best_height(),
        addr_from: ctx.addr().to_string(),
    };
    send_data(addr, message("version", &payload));
}

fn send_get_blocks(addr: &str, ctx: &NodeContext) {
    let payload = GetBlocks {
        addr_from: ctx.addr().to_string(),
    };
    send_data(addr, message("getblocks", &payload));
}

fn send_inv(addr: &str, kind: &str, items: Vec<Vec<u8>>, ctx: &NodeContext) {
    let payload = Inv {
        addr_from: ctx.addr().to_string(),
        kind: kind.to_string(),
        items,
    };
    send_data(addr, message("inv", &payload));
}

fn send_get_data(addr: &str, kind: &str, id: &[u8], ctx: &NodeContext) {
    let payload = GetData {
        addr_from: ctx.addr().to_string(),
        kind: kind.to_string(),
        id: id.to_vec(),
    };
    send_data(addr, message("getdata", &payload));
}

fn send_block(addr: &str, block: Vec<u8>, ctx: &NodeContext) {
    let payload = BlockData {
        addr_from: ctx.addr().to_string(),
        block,
    };
    send_data(addr, message("block", &payload));
}

/// Announce a freshly mined block to every other known peer.
/// Also used by the CLI after its offline-mining fallback.
pub fn broadcast_new_block(from_addr: &str, block_hash: &[u8]) {
    for peer in KNOWN_NODES {
        if peer == from_addr {
            continue;
        }
        let payload = Inv {
            addr_from: from_addr.to_string(),
            kind: "block".to_string(),
            items: vec![block_hash.to_vec()],
        };
        send_data(peer, message("inv", &payload));
    }
}

// ---- RPC clients (used by the CLI against a running node) ------------------

/// Ask the node at `localhost:<node_id>` to construct, sign, and mine a
/// transaction. Keeps the CLI process away from the node's database lock.
pub fn send_tx_request(node_id: &str, from: &str, to: &str, amount: u64) -> Result<String> {
    let addr = format!("localhost:{node_id}");
    let payload = TxRequest {
        addr_from: addr.clone(),
        from: from.to_string(),
        to: to.to_string(),
        amount,
    };
    let reply = send_request(&addr, &message("sendtx", &payload)?)?;
    if reply.command != "result" {
        return Err(BlockchainError::Transport(format!(
            "unexpected reply: {}",
            reply.command
        )));
    }
    let result: OpResult = deserialize(&reply.payload)?;
    if !result.ok {
        return Err(BlockchainError::Transport(result.message));
    }
    Ok(result.message)
}

/// Ask a running node for an address balance
pub fn get_balance_request(node_id: &str, address: &str) -> Result<u64> {
    let addr = format!("localhost:{node_id}");
    let payload = BalanceRequest {
        addr_from: addr.clone(),
        address: address.to_string(),
    };
    let reply = send_request(&addr, &message("getbalance", &payload)?)?;
    if reply.command != "balance" {
        return Err(BlockchainError::Transport(format!(
            "unexpected reply: {}",
            reply.command
        )));
    }
    let result: BalanceResponse = deserialize(&reply.payload)?;
    if !result.ok {
        return Err(BlockchainError::Transport(result.message));
    }
    Ok(result.balance)
}

/// Ask a running node for a printable snapshot of its chain
pub fn get_chain_request(node_id: &str) -> Result<(Vec<ChainBlock>, String)> {
    let addr = format!("localhost:{node_id}");
    let payload = ChainRequest {
        addr_from: addr.clone(),
    };
    let reply = send_request(&addr, &message("getchain", &payload)?)?;
    if reply.command != "chain" {
        return Err(BlockchainError::Transport(format!(
            "unexpected reply: {}",
            reply.command
        )));
    }
    let result: ChainResponse = deserialize(&reply.payload)?;
    if !result.ok {
        return Err(BlockchainError::Transport(result.message));
    }
    Ok((result.blocks, result.message))
}
