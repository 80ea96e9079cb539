//! Peer-to-peer networking
//!
//! Gossip-based block synchronization over a static peer set, plus the
//! RPC-style surface (`sendtx`/`getbalance`/`getchain`) the CLI talks to
//! while a node owns the database.

pub mod node;
pub mod server;

pub use node::{BlocksInTransit, NodeContext, BOOTSTRAP_NODE, KNOWN_NODES};
pub use server::{
    broadcast_new_block, get_balance_request, get_chain_request, send_tx_request, ChainBlock,
    Server, PROTOCOL_VERSION,
};
