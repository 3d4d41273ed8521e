use serde::Deserialize;
use std::fs;

use crate::tx::builder::FeePolicy;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub btc: BTCConfig,
    pub wallets: WalletsConfig,
    #[serde(default)]
    pub fees: FeePolicy,
}

#[derive(Deserialize, Clone, Debug)]
pub struct BTCConfig {
    pub network: Option<String>,
    pub address: String,
    pub rpc_user: String,
    pub rpc_password: String,
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u32,
}

fn default_min_confirmations() -> u32 {
    1
}

impl BTCConfig {
    pub fn get_network(&self) -> bitcoin::Network {
        let Some(net) = self.network.clone() else {
            return bitcoin::Network::Testnet;
        };

        match net.as_str() {
            "mainnet" => bitcoin::Network::Bitcoin,
            "testnet" => bitcoin::Network::Testnet,
            "regtest" => bitcoin::Network::Regtest,
            _ => bitcoin::Network::Testnet,
        }
    }
}

/// Wallet A funds the chain, wallet B relays the parent output, wallet C
/// receives. A and B need signing keys; C is address-only.
#[derive(Deserialize, Clone, Debug)]
pub struct WalletsConfig {
    pub a: SignerConfig,
    pub b: SignerConfig,
    pub c: AddressConfig,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SignerConfig {
    /// expected address; checked against the one the key derives to
    #[serde(default)]
    pub address: String,
    /// hex-encoded secret or WIF
    pub secret_key: String,
    pub mode: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct AddressConfig {
    pub address: String,
}

pub fn read_config(path: &str) -> anyhow::Result<Config> {
    let contents = fs::read_to_string(path)?;

    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}
