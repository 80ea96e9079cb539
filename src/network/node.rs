use std::sync::RwLock;

/// Static peer set. The first entry is the bootstrap node every other node
/// announces itself to on startup.
pub const KNOWN_NODES: [&str; 3] = ["localhost:3000", "localhost:3001", "localhost:3002"];

pub const BOOTSTRAP_NODE: &str = KNOWN_NODES[0];

/// Block hashes announced by a peer that this node has not yet downloaded.
/// Refilled on every `inv` and drained one hash per received block.
pub struct BlocksInTransit {
    inner: RwLock<Vec<Vec<u8>>>,
}

impl Default for BlocksInTransit {
    fn default() -> Self {
        Self::new()
    }
}

impl BlocksInTransit {
    pub fn new() -> BlocksInTransit {
        BlocksInTransit {
            inner: RwLock::new(vec![]),
        }
    }

    pub fn replace(&self, hashes: Vec<Vec<u8>>) {
        let mut inner = self
            .inner
            .write()
            .expect("Failed to acquire write lock on blocks in transit - this should never happen");
        *inner = hashes;
    }

    pub fn pop_front(&self) -> Option<Vec<u8>> {
        let mut inner = self
            .inner
            .write()
            .expect("Failed to acquire write lock on blocks in transit - this should never happen");
        if inner.is_empty() {
            None
        } else {
            Some(inner.remove(0))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .read()
            .expect("Failed to acquire read lock on blocks in transit - this should never happen")
            .is_empty()
    }
}

/// Per-node state handed to every connection handler: the node's own
/// address, the optional mining reward address, and the sync queue.
/// An explicit record instead of process-wide globals so concurrent
/// handlers share one lock-protected view.
pub struct NodeContext {
    addr: String,
    miner_addr: Option<String>,
    blocks_in_transit: BlocksInTransit,
}

impl NodeContext {
    pub fn new(addr: String, miner_addr: Option<String>) -> NodeContext {
        NodeContext {
            addr,
            miner_addr,
            blocks_in_transit: BlocksInTransit::new(),
        }
    }

    pub fn addr(&self) -> &str {
        self.addr.as_str()
    }

    pub fn is_bootstrap(&self) -> bool {
        self.addr == BOOTSTRAP_NODE
    }

    pub fn miner_addr(&self) -> Option<&str> {
        self.miner_addr.as_deref()
    }

    pub fn blocks_in_transit(&self) -> &BlocksInTransit {
        &self.blocks_in_transit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_in_transit_queue() {
        let transit = BlocksInTransit::new();
        assert!(transit.is_empty());
        assert!(transit.pop_front().is_none());

        transit.replace(vec![vec![1], vec![2], vec![3]]);
        assert_eq!(transit.pop_front(), Some(vec![1]));
        assert_eq!(transit.pop_front(), Some(vec![2]));

        // A new inventory replaces whatever was left.
        transit.replace(vec![vec![9]]);
        assert_eq!(transit.pop_front(), Some(vec![9]));
        assert!(transit.is_empty());
    }
}
