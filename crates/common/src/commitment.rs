use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::field::FieldElement;
use crate::token::Token;

/// One leaf of the on-chain commitment tree, as indexed off chain.
///
/// Rows are append-only: once written only `updated_at` may move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentRecord {
    pub token: Token,

    /// Position assigned by the program; unique within [`Self::tree_key`].
    pub leaf_index: u64,

    /// Decimal rendering of the commitment scalar; unique across the index.
    pub commitment: String,

    /// Hex-encoded ciphertext, opaque to the indexer.
    pub encrypted_output: String,

    /// Base58 mint; `None` for the base asset.
    pub mint_address: Option<String>,

    /// Signature of the transaction that emitted the event.
    pub transaction_signature: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommitmentRecord {
    pub fn new(
        token: Token,
        leaf_index: u64,
        commitment: &FieldElement,
        encrypted_output: &[u8],
        mint_address: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            token,
            leaf_index,
            commitment: commitment.to_decimal(),
            encrypted_output: hex::encode(encrypted_output),
            mint_address,
            transaction_signature: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.transaction_signature = Some(signature.into());
        self
    }

    /// Leaf-index space this record lives in.
    ///
    /// Equal to the token symbol, except for mints outside the token table:
    /// those fall back to the base symbol but own a separate tree, so they
    /// are keyed by mint and never share leaf slots with the base asset.
    pub fn tree_key(&self) -> String {
        match &self.mint_address {
            Some(mint) if self.token.is_base() => format!("mint:{}", mint),
            _ => self.token.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_encodes_commitment_and_ciphertext() {
        let mut bytes = [0u8; 32];
        bytes[31] = 7;
        let record = CommitmentRecord::new(
            Token::Sol,
            3,
            &FieldElement::new(bytes),
            &[0xde, 0xad],
            None,
        )
        .with_signature("sig");

        assert_eq!(record.commitment, "7");
        assert_eq!(record.encrypted_output, "dead");
        assert_eq!(record.transaction_signature.as_deref(), Some("sig"));
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn test_unlisted_mint_has_its_own_tree_key() {
        let base = CommitmentRecord::new(Token::Sol, 0, &FieldElement::ZERO, &[], None);
        let unlisted = CommitmentRecord::new(
            Token::Sol,
            0,
            &FieldElement::ZERO,
            &[],
            Some("So1ana11111111111111111111111111111111111111".to_string()),
        );
        let usdc = CommitmentRecord::new(
            Token::Usdc,
            0,
            &FieldElement::ZERO,
            &[],
            Some("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string()),
        );

        assert_eq!(base.tree_key(), "SOL");
        assert_eq!(
            unlisted.tree_key(),
            "mint:So1ana11111111111111111111111111111111111111"
        );
        assert_eq!(usdc.tree_key(), "USDC");
    }

    #[test]
    fn test_record_json_uses_token_symbol() {
        let record = CommitmentRecord::new(Token::Usdc, 0, &FieldElement::ZERO, &[], None);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["token"], "USDC");
    }
}
