use std::collections::HashMap;
use std::str::FromStr;

use thiserror::Error;

/// Supported networks. Each maps to its own upstream endpoint set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub const ALL: [Network; 2] = [Network::Mainnet, Network::Testnet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            Network::Mainnet => "MAINNET",
            Network::Testnet => "TESTNET",
        }
    }
}

impl FromStr for Network {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Upstream endpoints for one network.
#[derive(Debug, Clone)]
pub struct NetworkEndpoints {
    pub rpc_url: String,
    pub graphql_url: String,
    /// The protocol's event-emitting contract, used as the log filter.
    pub protocol_address: String,
    pub explorer_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub networks: HashMap<Network, NetworkEndpoints>,
    pub bech32_prefix: String,
    pub stable_symbol: String,
    pub lookback_blocks: u64,
    pub vault_apy: f64,
    pub volume_refresh_secs: u64,
    pub global_history_limit: i64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16)?;

        let mut networks = HashMap::new();
        for network in Network::ALL {
            if let Some(endpoints) = network_endpoints_from_map(&env_map, network)? {
                networks.insert(network, endpoints);
            }
        }
        if networks.is_empty() {
            return Err(ConfigError::MissingEnv("MAINNET_RPC_URL".to_string()));
        }

        let bech32_prefix = env_map
            .get("BECH32_PREFIX")
            .cloned()
            .unwrap_or_else(|| "sei".to_string());
        let stable_symbol = env_map
            .get("STABLE_SYMBOL")
            .cloned()
            .unwrap_or_else(|| "USDC".to_string());

        let lookback_blocks = parse_or(&env_map, "LOOKBACK_BLOCKS", 90_000u64)?;
        let vault_apy = parse_or(&env_map, "VAULT_APY", 0.10f64)?;
        let volume_refresh_secs = parse_or(&env_map, "VOLUME_REFRESH_SECS", 14_400u64)?;
        let global_history_limit = parse_or(&env_map, "GLOBAL_HISTORY_LIMIT", 5_000i64)?;

        Ok(Config {
            port,
            networks,
            bech32_prefix,
            stable_symbol,
            lookback_blocks,
            vault_apy,
            volume_refresh_secs,
            global_history_limit,
        })
    }

    pub fn endpoints(&self, network: Network) -> Option<&NetworkEndpoints> {
        self.networks.get(&network)
    }
}

/// Read one network's endpoint set. A network with no vars at all is simply
/// not configured; a partially configured one is an error.
fn network_endpoints_from_map(
    env_map: &HashMap<String, String>,
    network: Network,
) -> Result<Option<NetworkEndpoints>, ConfigError> {
    let prefix = network.env_prefix();
    let rpc_key = format!("{}_RPC_URL", prefix);
    let graphql_key = format!("{}_GRAPHQL_URL", prefix);
    let address_key = format!("{}_PROTOCOL_ADDRESS", prefix);

    let any_present = [&rpc_key, &graphql_key, &address_key]
        .iter()
        .any(|key| env_map.contains_key(*key));
    if !any_present {
        return Ok(None);
    }

    let require = |key: &str| {
        env_map
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
    };

    Ok(Some(NetworkEndpoints {
        rpc_url: require(&rpc_key)?,
        graphql_url: require(&graphql_key)?,
        protocol_address: require(&address_key)?,
        explorer_url: env_map
            .get(&format!("{}_EXPLORER_URL", prefix))
            .cloned()
            .unwrap_or_default(),
    }))
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), format!("cannot parse {:?}", raw))
        }),
    }
}
