//! Append-only, hash-chained record of every committed mutation
use super::error::EngineError;
use super::invoice::{Identity, InvoiceStatus, TimeStamp};
use chrono::Utc;

/// `prev_hash` of the first event in the log.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct Event {
    #[n(0)]
    pub seq: u64, // starts at 1, contiguous
    #[n(1)]
    pub invoice_id: Option<u64>, // None for platform level events
    #[n(2)]
    pub actor: Identity,
    #[n(3)]
    pub timestamp: TimeStamp<Utc>,
    #[n(4)]
    pub kind: EventKind,
    #[n(5)]
    pub prev_hash: String,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub enum EventKind {
    #[n(0)]
    InvoiceCreated {
        #[n(0)]
        business: Identity,
        #[n(1)]
        debtor: Identity,
        #[n(2)]
        amount: u64,
        #[n(3)]
        due_date: TimeStamp<Utc>,
    },
    #[n(1)]
    CollateralDeposited {
        #[n(0)]
        business: Identity,
        #[n(1)]
        amount: u64,
    },
    #[n(2)]
    InvoiceFactored {
        #[n(0)]
        investor: Identity,
        #[n(1)]
        factor_amount: u64,
        #[n(2)]
        collateral_amount: u64,
        #[n(3)]
        insurance_fee: u64,
    },
    #[n(3)]
    InvoicePaid {
        #[n(0)]
        payer: Identity,
        #[n(1)]
        amount: u64,
        #[n(2)]
        investor_return: u64,
        #[n(3)]
        platform_fee: u64,
    },
    #[n(4)]
    CollateralWithdrawn {
        #[n(0)]
        business: Identity,
        #[n(1)]
        amount: u64,
    },
    #[n(5)]
    InsuranceClaim {
        #[n(0)]
        investor: Identity,
        #[n(1)]
        claimed: u64,
        #[n(2)]
        from_collateral: u64,
        #[n(3)]
        from_pool: u64,
        #[n(4)]
        shortfall: u64,
    },
    #[n(6)]
    InvoiceDefaulted {
        #[n(0)]
        previous: InvoiceStatus,
    },
    #[n(7)]
    PlatformFeesWithdrawn {
        #[n(0)]
        amount: u64,
    },
    #[n(8)]
    CreditScoreSet {
        #[n(0)]
        business: Identity,
        #[n(1)]
        score: u32,
    },
    #[n(9)]
    PauseChanged {
        #[n(0)]
        paused: bool,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::InvoiceCreated { .. } => "InvoiceCreated",
            EventKind::CollateralDeposited { .. } => "CollateralDeposited",
            EventKind::InvoiceFactored { .. } => "InvoiceFactored",
            EventKind::InvoicePaid { .. } => "InvoicePaid",
            EventKind::CollateralWithdrawn { .. } => "CollateralWithdrawn",
            EventKind::InsuranceClaim { .. } => "InsuranceClaim",
            EventKind::InvoiceDefaulted { .. } => "InvoiceDefaulted",
            EventKind::PlatformFeesWithdrawn { .. } => "PlatformFeesWithdrawn",
            EventKind::CreditScoreSet { .. } => "CreditScoreSet",
            EventKind::PauseChanged { .. } => "PauseChanged",
        }
    }
}

impl Event {
    pub fn new(
        seq: u64,
        invoice_id: Option<u64>,
        actor: Identity,
        timestamp: TimeStamp<Utc>,
        kind: EventKind,
        prev_hash: String,
    ) -> Self {
        Self {
            seq,
            invoice_id,
            actor,
            timestamp,
            kind,
            prev_hash,
        }
    }

    /// CBOR encoding of the event and the sha256 digest of that encoding.
    pub fn build(&self) -> Result<(String, Vec<u8>), EngineError> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

/// Walks events in sequence order checking numbering and hash links.
/// Returns the hash of the last event.
pub fn verify_chain<'a, I>(events: I) -> Result<String, EngineError>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut head = GENESIS_HASH.to_string();
    let mut expected_seq = 1;

    for event in events {
        if event.seq != expected_seq || event.prev_hash != head {
            return Err(EngineError::CorruptEventLog(event.seq));
        }
        head = event.build()?.0;
        expected_seq += 1;
    }
    Ok(head)
}
