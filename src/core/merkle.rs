use crate::utils::sha256_digest;

/// Binary SHA-256 commitment over the ordered transaction ids of a block.
///
/// Leaves hash their datum, internal nodes hash the concatenation of their
/// children, and a level with an odd node count duplicates its last node.
pub struct MerkleTree {
    root: Vec<u8>,
}

impl MerkleTree {
    /// Build the tree over a list of data items (transaction ids).
    /// An empty list yields the hash of no bytes.
    pub fn new(data: &[Vec<u8>]) -> MerkleTree {
        if data.is_empty() {
            return MerkleTree {
                root: sha256_digest(&[]),
            };
        }

        let mut current_level: Vec<Vec<u8>> =
            data.iter().map(|datum| sha256_digest(datum)).collect();

        while current_level.len() > 1 {
            if current_level.len() % 2 != 0 {
                let last = current_level
                    .last()
                    .cloned()
                    .expect("level is non-empty");
                current_level.push(last);
            }

            let mut next_level = Vec::with_capacity(current_level.len() / 2);
            for pair in current_level.chunks_exact(2) {
                let mut combined = Vec::with_capacity(pair[0].len() + pair[1].len());
                combined.extend_from_slice(&pair[0]);
                combined.extend_from_slice(&pair[1]);
                next_level.push(sha256_digest(&combined));
            }
            current_level = next_level;
        }

        let root = current_level
            .into_iter()
            .next()
            .expect("tree reduction leaves exactly one node");
        MerkleTree { root }
    }

    pub fn root_hash(&self) -> &[u8] {
        self.root.as_slice()
    }
}
