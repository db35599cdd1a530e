//! Static catalog of supported networks.
//!
//! Every network a requirement may name is listed here with its USDC
//! deployment, a public RPC endpoint, and an explorer link template. The
//! catalog is configuration only; nothing is discovered at runtime.
//!
//! ```
//! use p402::networks::{NetworkCatalog, NetworkKey};
//!
//! let catalog = NetworkCatalog::global();
//! let celo = catalog.resolve_label("celo").unwrap();
//! assert_eq!(celo.chain_id, 42220);
//! assert_eq!(catalog.lookup(NetworkKey::NumericId(42220)).unwrap(), celo);
//! ```

use std::fmt;

use alloy_primitives::{Address, address};

use crate::chain::ChainId;

/// Placeholder replaced by the transaction hash in explorer templates.
pub const TX_PLACEHOLDER: &str = "{tx}";

/// Facts about one supported network and its USDC deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Legacy protocol v1 name (e.g. `"base-sepolia"`).
    pub legacy_name: &'static str,
    /// Numeric EIP-155 chain id.
    pub chain_id: u64,
    /// USDC contract address.
    pub asset: Address,
    /// Public JSON-RPC endpoint.
    pub rpc_url: &'static str,
    /// Explorer transaction URL template containing [`TX_PLACEHOLDER`].
    pub explorer_url: &'static str,
    /// Human readable name.
    pub display_name: &'static str,
    /// Default EIP-712 domain name of the token.
    pub token_name: &'static str,
    /// Default EIP-712 domain version of the token.
    pub token_version: &'static str,
    /// Token decimals.
    pub decimals: u8,
    /// Whether this is a test network.
    pub testnet: bool,
}

impl NetworkInfo {
    /// Returns the CAIP-2 identifier of this network.
    #[must_use]
    pub fn caip2(&self) -> ChainId {
        ChainId::eip155(self.chain_id)
    }

    /// Returns the explorer link for a transaction hash.
    #[must_use]
    pub fn explorer_tx_url(&self, tx_hash: &str) -> String {
        self.explorer_url.replace(TX_PLACEHOLDER, tx_hash)
    }
}

impl fmt::Display for NetworkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.caip2())
    }
}

/// No catalog entry matches the given key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown network: {0}")]
pub struct UnknownNetwork(pub String);

/// Any attribute a network can be looked up by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKey<'a> {
    /// Legacy v1 name, case-insensitive.
    LegacyName(&'a str),
    /// CAIP-2 identifier.
    ChainId(&'a ChainId),
    /// Numeric EIP-155 chain id.
    NumericId(u64),
    /// USDC contract address.
    Asset(Address),
    /// RPC endpoint, ignoring a trailing slash.
    RpcUrl(&'a str),
    /// Explorer template.
    ExplorerUrl(&'a str),
    /// Display name, case-insensitive.
    DisplayName(&'a str),
}

impl NetworkKey<'_> {
    fn matches(&self, info: &NetworkInfo) -> bool {
        match *self {
            NetworkKey::LegacyName(name) => info.legacy_name.eq_ignore_ascii_case(name.trim()),
            NetworkKey::ChainId(chain) => chain.as_eip155() == Some(info.chain_id),
            NetworkKey::NumericId(id) => info.chain_id == id,
            NetworkKey::Asset(asset) => info.asset == asset,
            NetworkKey::RpcUrl(url) => {
                info.rpc_url.trim_end_matches('/') == url.trim().trim_end_matches('/')
            }
            NetworkKey::ExplorerUrl(url) => info.explorer_url == url.trim(),
            NetworkKey::DisplayName(name) => info.display_name.eq_ignore_ascii_case(name.trim()),
        }
    }
}

impl fmt::Display for NetworkKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkKey::LegacyName(name) | NetworkKey::DisplayName(name) => f.write_str(name),
            NetworkKey::ChainId(chain) => write!(f, "{chain}"),
            NetworkKey::NumericId(id) => write!(f, "chain id {id}"),
            NetworkKey::Asset(asset) => write!(f, "asset {asset}"),
            NetworkKey::RpcUrl(url) | NetworkKey::ExplorerUrl(url) => f.write_str(url),
        }
    }
}

const fn usdc(
    legacy_name: &'static str,
    chain_id: u64,
    asset: Address,
    rpc_url: &'static str,
    explorer_url: &'static str,
    display_name: &'static str,
    token_name: &'static str,
    testnet: bool,
) -> NetworkInfo {
    NetworkInfo {
        legacy_name,
        chain_id,
        asset,
        rpc_url,
        explorer_url,
        display_name,
        token_name,
        token_version: "2",
        decimals: crate::amount::USDC_DECIMALS,
        testnet,
    }
}

/// Every supported network.
pub const NETWORKS: &[NetworkInfo] = &[
    usdc(
        "base",
        8453,
        address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
        "https://mainnet.base.org",
        "https://basescan.org/tx/{tx}",
        "Base",
        "USD Coin",
        false,
    ),
    usdc(
        "base-sepolia",
        84532,
        address!("036CbD53842c5426634e7929541eC2318f3dCF7e"),
        "https://sepolia.base.org",
        "https://sepolia.basescan.org/tx/{tx}",
        "Base Sepolia",
        "USDC",
        true,
    ),
    usdc(
        "polygon",
        137,
        address!("3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
        "https://polygon-rpc.com",
        "https://polygonscan.com/tx/{tx}",
        "Polygon",
        "USD Coin",
        false,
    ),
    usdc(
        "polygon-amoy",
        80002,
        address!("41E94Eb019C0762f9Bfcf9Fb1E58725BfB0e7582"),
        "https://rpc-amoy.polygon.technology",
        "https://amoy.polygonscan.com/tx/{tx}",
        "Polygon Amoy",
        "USDC",
        true,
    ),
    usdc(
        "avalanche",
        43114,
        address!("B97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E"),
        "https://api.avax.network/ext/bc/C/rpc",
        "https://snowtrace.io/tx/{tx}",
        "Avalanche",
        "USD Coin",
        false,
    ),
    usdc(
        "avalanche-fuji",
        43113,
        address!("5425890298aed601595a70AB815c96711a31Bc65"),
        "https://api.avax-test.network/ext/bc/C/rpc",
        "https://testnet.snowtrace.io/tx/{tx}",
        "Avalanche Fuji",
        "USD Coin",
        true,
    ),
    usdc(
        "celo",
        42220,
        address!("cebA9300f2b948710d2653dD7B07f33A8B32118C"),
        "https://forno.celo.org",
        "https://celoscan.io/tx/{tx}",
        "Celo",
        "USD Coin",
        false,
    ),
    usdc(
        "celo-sepolia",
        11_142_220,
        address!("01C5C0122039549AD1493B8220cABEdD739BC44E"),
        "https://forno.celo-sepolia.celo-testnet.org",
        "https://celo-sepolia.blockscout.com/tx/{tx}",
        "Celo Sepolia",
        "USD Coin",
        true,
    ),
    usdc(
        "ethereum",
        1,
        address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
        "https://eth.llamarpc.com",
        "https://etherscan.io/tx/{tx}",
        "Ethereum",
        "USD Coin",
        false,
    ),
];

static GLOBAL: NetworkCatalog = NetworkCatalog::new(NETWORKS);

/// Read-only lookup over a static network table.
#[derive(Debug, Clone, Copy)]
pub struct NetworkCatalog {
    networks: &'static [NetworkInfo],
}

impl NetworkCatalog {
    /// Wraps a static network table.
    #[must_use]
    pub const fn new(networks: &'static [NetworkInfo]) -> Self {
        Self { networks }
    }

    /// The catalog of every supported network.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Returns all catalog entries.
    #[must_use]
    pub const fn networks(&self) -> &'static [NetworkInfo] {
        self.networks
    }

    /// Finds the network matching `key`.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownNetwork`] when nothing matches.
    pub fn lookup(&self, key: NetworkKey<'_>) -> Result<&'static NetworkInfo, UnknownNetwork> {
        self.networks
            .iter()
            .find(|info| key.matches(info))
            .ok_or_else(|| UnknownNetwork(key.to_string()))
    }

    /// Looks up a network by its legacy v1 name.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownNetwork`] when nothing matches.
    pub fn by_legacy_name(&self, name: &str) -> Result<&'static NetworkInfo, UnknownNetwork> {
        self.lookup(NetworkKey::LegacyName(name))
    }

    /// Looks up a network by its CAIP-2 identifier.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownNetwork`] when nothing matches.
    pub fn by_chain_id(&self, chain: &ChainId) -> Result<&'static NetworkInfo, UnknownNetwork> {
        self.lookup(NetworkKey::ChainId(chain))
    }

    /// Looks up a network by its numeric EIP-155 chain id.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownNetwork`] when nothing matches.
    pub fn by_numeric_id(&self, chain_id: u64) -> Result<&'static NetworkInfo, UnknownNetwork> {
        self.lookup(NetworkKey::NumericId(chain_id))
    }

    /// Looks up a network by its USDC contract address.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownNetwork`] when nothing matches.
    pub fn by_asset(&self, asset: Address) -> Result<&'static NetworkInfo, UnknownNetwork> {
        self.lookup(NetworkKey::Asset(asset))
    }

    /// Looks up a network by its RPC endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownNetwork`] when nothing matches.
    pub fn by_rpc_url(&self, url: &str) -> Result<&'static NetworkInfo, UnknownNetwork> {
        self.lookup(NetworkKey::RpcUrl(url))
    }

    /// Looks up a network by its explorer template.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownNetwork`] when nothing matches.
    pub fn by_explorer_url(&self, url: &str) -> Result<&'static NetworkInfo, UnknownNetwork> {
        self.lookup(NetworkKey::ExplorerUrl(url))
    }

    /// Looks up a network by its display name.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownNetwork`] when nothing matches.
    pub fn by_display_name(&self, name: &str) -> Result<&'static NetworkInfo, UnknownNetwork> {
        self.lookup(NetworkKey::DisplayName(name))
    }

    /// Resolves a server-declared network label.
    ///
    /// Labels containing a colon are CAIP-2 identifiers (`eip155:42220`), all
    /// others are legacy names (`celo`).
    ///
    /// # Errors
    ///
    /// Returns [`UnknownNetwork`] carrying the label when nothing matches.
    pub fn resolve_label(&self, label: &str) -> Result<&'static NetworkInfo, UnknownNetwork> {
        let label = label.trim();
        let found = if label.contains(':') {
            label
                .parse::<ChainId>()
                .ok()
                .and_then(|chain| self.by_chain_id(&chain).ok())
        } else {
            self.by_legacy_name(label).ok()
        };
        found.ok_or_else(|| UnknownNetwork(label.to_owned()))
    }
}

impl Default for NetworkCatalog {
    fn default() -> Self {
        GLOBAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn catalog_entries_are_unique() {
        let catalog = NetworkCatalog::global();
        let names: HashSet<_> = catalog.networks().iter().map(|n| n.legacy_name).collect();
        let ids: HashSet<_> = catalog.networks().iter().map(|n| n.chain_id).collect();
        let assets: HashSet<_> = catalog.networks().iter().map(|n| n.asset).collect();
        assert_eq!(names.len(), catalog.networks().len());
        assert_eq!(ids.len(), catalog.networks().len());
        assert_eq!(assets.len(), catalog.networks().len());
        assert_eq!(catalog.networks().len(), 9);
    }

    #[test]
    fn every_key_kind_finds_the_same_entry() {
        let catalog = NetworkCatalog::global();
        let base = catalog.by_numeric_id(8453).unwrap();
        assert_eq!(catalog.by_legacy_name("BASE").unwrap(), base);
        assert_eq!(catalog.by_chain_id(&ChainId::eip155(8453)).unwrap(), base);
        assert_eq!(catalog.by_asset(base.asset).unwrap(), base);
        assert_eq!(catalog.by_rpc_url("https://mainnet.base.org/").unwrap(), base);
        assert_eq!(
            catalog
                .by_explorer_url("https://basescan.org/tx/{tx}")
                .unwrap(),
            base
        );
        assert_eq!(catalog.by_display_name("base").unwrap(), base);
    }

    #[test]
    fn resolves_both_label_styles() {
        let catalog = NetworkCatalog::global();
        let legacy = catalog.resolve_label("avalanche-fuji").unwrap();
        let caip = catalog.resolve_label("eip155:43113").unwrap();
        assert_eq!(legacy, caip);
        assert_eq!(legacy.caip2().to_string(), "eip155:43113");
    }

    #[test]
    fn unknown_keys_are_reported() {
        let catalog = NetworkCatalog::global();
        assert_eq!(
            catalog.resolve_label("solana"),
            Err(UnknownNetwork("solana".into()))
        );
        assert!(catalog.resolve_label("eip155:999999").is_err());
        assert!(catalog.resolve_label("eip155").is_err());
        assert!(catalog.by_numeric_id(10).is_err());
        assert!(
            catalog
                .by_chain_id(&ChainId::new("solana", "8453"))
                .is_err()
        );
    }

    #[test]
    fn explorer_link_substitutes_hash() {
        let celo = NetworkCatalog::global().by_legacy_name("celo").unwrap();
        assert_eq!(
            celo.explorer_tx_url("0xabc"),
            "https://celoscan.io/tx/0xabc"
        );
    }
}
