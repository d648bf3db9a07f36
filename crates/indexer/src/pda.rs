//! Program-derived addresses of the accounts the indexer reads.

use pool_common::{Error, Network, Result, Token};
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;

pub const TREE_SEED: &[u8] = b"merkle_tree";
pub const GLOBAL_CONFIG_SEED: &[u8] = b"global_config";

/// Which tree to read: a known token, or a raw mint address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asset {
    Token(Token),
    Mint(Pubkey),
}

impl Asset {
    /// Mint of the asset, `None` for the base asset.
    pub fn mint(&self, network: Network) -> Result<Option<Pubkey>> {
        match self {
            Asset::Token(token) if token.is_base() => Ok(None),
            Asset::Token(token) => {
                let address = token.mint(network).ok_or_else(|| {
                    Error::UnknownToken(format!("{} has no mint on {}", token, network))
                })?;
                let mint = Pubkey::from_str(address)
                    .map_err(|e| Error::UnknownToken(format!("{address}: {e}")))?;
                Ok(Some(mint))
            }
            Asset::Mint(mint) => Ok(Some(*mint)),
        }
    }
}

impl FromStr for Asset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(token) = s.parse::<Token>() {
            return Ok(Asset::Token(token));
        }
        Pubkey::from_str(s.trim())
            .map(Asset::Mint)
            .map_err(|_| Error::UnknownToken(s.to_string()))
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Token(token) => write!(f, "{}", token),
            Asset::Mint(mint) => write!(f, "{}", mint),
        }
    }
}

/// Tree-state account for `asset`: `["merkle_tree"]` for the base asset,
/// `["merkle_tree", mint]` otherwise.
pub fn tree_account(program_id: &Pubkey, asset: Asset, network: Network) -> Result<Pubkey> {
    let mint = asset.mint(network)?;
    Ok(tree_account_for_mint(program_id, mint.as_ref()))
}

pub fn tree_account_for_mint(program_id: &Pubkey, mint: Option<&Pubkey>) -> Pubkey {
    match mint {
        None => Pubkey::find_program_address(&[TREE_SEED], program_id).0,
        Some(mint) => Pubkey::find_program_address(&[TREE_SEED, mint.as_ref()], program_id).0,
    }
}

pub fn fee_config_account(program_id: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[GLOBAL_CONFIG_SEED], program_id).0
}
