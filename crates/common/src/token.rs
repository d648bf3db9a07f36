//! Asset allow-list and the per-network mint tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Symbol identifying the asset class of a commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Token {
    /// Base asset; its commitments carry no mint.
    Sol,
    Usdc,
    Usdt,
    Ore,
}

/// Cluster the program is deployed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Devnet,
    Mainnet,
}

const MAINNET_MINTS: &[(&str, Token)] = &[
    ("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", Token::Usdc),
    ("Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB", Token::Usdt),
    ("oreoU2P8bN6jkk3jbaiVxYnG1dCXcYxwhwyK9jSybcp", Token::Ore),
];

const DEVNET_MINTS: &[(&str, Token)] = &[
    ("4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU", Token::Usdc),
];

impl Token {
    pub const ALL: [Token; 4] = [Token::Sol, Token::Usdc, Token::Usdt, Token::Ore];

    pub fn symbol(&self) -> &'static str {
        match self {
            Token::Sol => "SOL",
            Token::Usdc => "USDC",
            Token::Usdt => "USDT",
            Token::Ore => "ORE",
        }
    }

    pub fn is_base(&self) -> bool {
        matches!(self, Token::Sol)
    }

    /// Resolve a token-asset mint to its symbol.
    ///
    /// Mints missing from the network's table are classified as the base
    /// asset. This reclassifies unknown assets silently; callers that need to
    /// tell the two apart should check [`Token::lookup_mint`] first.
    pub fn from_mint(network: Network, mint: &str) -> Token {
        Self::lookup_mint(network, mint).unwrap_or(Token::Sol)
    }

    /// Exact table lookup without the base-asset fallback.
    pub fn lookup_mint(network: Network, mint: &str) -> Option<Token> {
        network
            .mint_table()
            .iter()
            .find(|(address, _)| *address == mint)
            .map(|(_, token)| *token)
    }

    /// Mint address of this token on `network`; `None` for the base asset or
    /// a token not deployed there.
    pub fn mint(&self, network: Network) -> Option<&'static str> {
        network
            .mint_table()
            .iter()
            .find(|(_, token)| token == self)
            .map(|(address, _)| *address)
    }
}

impl Network {
    fn mint_table(&self) -> &'static [(&'static str, Token)] {
        match self {
            Network::Devnet => DEVNET_MINTS,
            Network::Mainnet => MAINNET_MINTS,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Token {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SOL" => Ok(Token::Sol),
            "USDC" => Ok(Token::Usdc),
            "USDT" => Ok(Token::Usdt),
            "ORE" => Ok(Token::Ore),
            _ => Err(Error::UnknownToken(s.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Devnet => f.write_str("devnet"),
            Network::Mainnet => f.write_str("mainnet"),
        }
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "devnet" => Ok(Network::Devnet),
            "mainnet" | "mainnet-beta" => Ok(Network::Mainnet),
            other => Err(Error::Other(anyhow::anyhow!("unknown network: {other}"))),
        }
    }
}
