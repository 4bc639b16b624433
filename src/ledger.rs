//! Persistent invoice store and its owner indices
use super::error::EngineError;
use super::invoice::{Identity, Invoice};
use super::utils::{index_key, index_prefix, u64_from_key, u64_key};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};
use sled::{Db, Tree};

pub type TxResult<T> = ConflictableTransactionResult<T, EngineError>;

pub(crate) fn abort(err: EngineError) -> ConflictableTransactionError<EngineError> {
    ConflictableTransactionError::Abort(err)
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> TxResult<Vec<u8>> {
    minicbor::to_vec(value).map_err(|e| abort(e.into()))
}

pub(crate) fn decode<T>(bytes: &[u8]) -> TxResult<T>
where
    for<'b> T: minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|e| abort(e.into()))
}

/// Records are keyed by big-endian id and never removed.
#[derive(Clone)]
pub struct InvoiceLedger {
    invoices: Tree,
    by_business: Tree,
    by_investor: Tree,
}

impl InvoiceLedger {
    pub fn open(db: &Db) -> Result<Self, EngineError> {
        Ok(Self {
            invoices: db.open_tree("invoices")?,
            by_business: db.open_tree("by_business")?,
            by_investor: db.open_tree("by_investor")?,
        })
    }

    pub fn invoices(&self) -> &Tree {
        &self.invoices
    }
    pub fn by_business(&self) -> &Tree {
        &self.by_business
    }
    pub fn by_investor(&self) -> &Tree {
        &self.by_investor
    }

    pub fn get(&self, id: u64) -> Result<Invoice, EngineError> {
        match self.invoices.get(u64_key(id))? {
            Some(bytes) => Ok(minicbor::decode(&bytes)?),
            None => Err(EngineError::NotFound(id)),
        }
    }

    pub fn list_by_business(&self, business: &Identity) -> Result<Vec<u64>, EngineError> {
        Self::scan(&self.by_business, business)
    }

    pub fn list_by_investor(&self, investor: &Identity) -> Result<Vec<u64>, EngineError> {
        Self::scan(&self.by_investor, investor)
    }

    // keys sort by id, which is allocation order
    fn scan(index: &Tree, owner: &Identity) -> Result<Vec<u64>, EngineError> {
        let prefix = index_prefix(owner.as_str());
        let mut ids = vec![];
        for entry in index.scan_prefix(&prefix) {
            let (key, _) = entry?;
            let id = u64_from_key(&key[prefix.len()..])
                .ok_or_else(|| EngineError::Codec("malformed index key".into()))?;
            ids.push(id);
        }
        Ok(ids)
    }

    pub fn load_tx(invoices: &TransactionalTree, id: u64) -> TxResult<Invoice> {
        match invoices.get(u64_key(id))? {
            Some(bytes) => decode(&bytes),
            None => Err(abort(EngineError::NotFound(id))),
        }
    }

    pub fn store_tx(invoices: &TransactionalTree, invoice: &Invoice) -> TxResult<()> {
        invoices.insert(u64_key(invoice.id).to_vec(), encode(invoice)?)?;
        Ok(())
    }

    pub fn index_tx(index: &TransactionalTree, owner: &Identity, id: u64) -> TxResult<()> {
        index.insert(index_key(owner.as_str(), id), Vec::<u8>::new())?;
        Ok(())
    }
}
