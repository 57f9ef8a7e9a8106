use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// All chains DDPay can watch.
///
/// The serialized name doubles as the prefix of every ephemeral order key,
/// so it must never contain `_`.
pub enum Chain {
    #[serde(rename = "bsc")]
    Bsc,
    #[serde(rename = "arb")]
    ArbitrumOne,
    #[serde(rename = "pol")]
    Polygon,
    #[serde(rename = "eth")]
    Ethereum,
    #[serde(rename = "base")]
    Base,
}

/// The family a chain belongs to, which decides how it is watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainKind {
    /// EVM chains with an Ethereum-compatible JSON-RPC endpoint.
    Evm,
}

impl Chain {
    pub const ALL: [Chain; 5] = [
        Chain::Bsc,
        Chain::ArbitrumOne,
        Chain::Polygon,
        Chain::Ethereum,
        Chain::Base,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Bsc => "bsc",
            Chain::ArbitrumOne => "arb",
            Chain::Polygon => "pol",
            Chain::Ethereum => "eth",
            Chain::Base => "base",
        }
    }

    pub fn kind(&self) -> ChainKind {
        match self {
            Chain::Bsc | Chain::ArbitrumOne | Chain::Polygon | Chain::Ethereum | Chain::Base => {
                ChainKind::Evm
            }
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown chain: {0}")]
pub struct UnknownChain(pub String);

impl FromStr for Chain {
    type Err = UnknownChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Chain::ALL
            .into_iter()
            .find(|chain| chain.as_str() == s)
            .ok_or_else(|| UnknownChain(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip_through_from_str() {
        for chain in Chain::ALL {
            assert_eq!(chain.as_str().parse::<Chain>(), Ok(chain));
            assert!(!chain.as_str().contains('_'));
        }
        assert!("sol".parse::<Chain>().is_err());
    }

    #[test]
    fn test_serde_name_matches_key_prefix() {
        let json = serde_json::to_string(&Chain::Polygon).unwrap();
        assert_eq!(json, "\"pol\"");
        let parsed: Chain = serde_json::from_str("\"arb\"").unwrap();
        assert_eq!(parsed, Chain::ArbitrumOne);
    }
}
