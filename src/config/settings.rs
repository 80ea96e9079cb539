use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::env;
use std::sync::RwLock;

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::new);

/// NODE_ID selects both the TCP port and the chain database file.
const NODE_ID_KEY: &str = "NODE_ID";
const DEFAULT_NODE_ID: &str = "3000";

/// Process configuration derived from the environment.
pub struct Config {
    inner: RwLock<HashMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Config {
        let node_id = env::var(NODE_ID_KEY).unwrap_or_else(|_| String::from(DEFAULT_NODE_ID));

        let mut map = HashMap::new();
        map.insert(String::from(NODE_ID_KEY), node_id);

        Config {
            inner: RwLock::new(map),
        }
    }

    pub fn node_id(&self) -> String {
        let inner = self
            .inner
            .read()
            .expect("Failed to acquire read lock on config - this should never happen");
        inner
            .get(NODE_ID_KEY)
            .expect("Node ID should always be present in config")
            .clone()
    }

    /// TCP address this node listens on: `localhost:<NODE_ID>`
    pub fn node_addr(&self) -> String {
        format!("localhost:{}", self.node_id())
    }
}
