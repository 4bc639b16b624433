//! Operator-assigned credit scores
//!
//! Scores are manual policy input. Nothing in the engine derives them from
//! repayment history; policy layers outside the engine read them.

use super::error::EngineError;
use super::invoice::Identity;
use super::ledger::TxResult;
use sled::transaction::TransactionalTree;
use sled::{Db, Tree};

#[derive(Clone)]
pub struct CreditRegistry {
    scores: Tree,
}

impl CreditRegistry {
    pub fn open(db: &Db) -> Result<Self, EngineError> {
        Ok(Self {
            scores: db.open_tree("scores")?,
        })
    }

    pub fn tree(&self) -> &Tree {
        &self.scores
    }

    /// `None` means the business has never been scored.
    pub fn get_score(&self, business: &Identity) -> Result<Option<u32>, EngineError> {
        match self.scores.get(business.as_str())? {
            Some(bytes) => decode_score(&bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn set_score_tx(scores: &TransactionalTree, business: &Identity, score: u32) -> TxResult<()> {
        scores.insert(business.as_str(), score.to_be_bytes().to_vec())?;
        Ok(())
    }
}

fn decode_score(bytes: &[u8]) -> Result<u32, EngineError> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| EngineError::Codec("credit score is not four bytes".into()))?;
    Ok(u32::from_be_bytes(raw))
}
