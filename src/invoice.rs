//! Core invoice record, identities and timestamps
use super::error::EngineError;
use super::utils::new_uuid_to_bech32;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(TimeStamp)
    }
    pub fn from_nanos(nanos: i64) -> Self {
        Self(DateTime::from_timestamp_nanos(nanos))
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn checked_add(&self, delta: TimeDelta) -> Option<Self> {
        self.0.checked_add_signed(delta).map(TimeStamp)
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

// `Utc` itself is not ordered, so a derive would not apply here
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl fmt::Display for TimeStamp<Utc> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// A bech32 encoded party address (business, debtor, investor or operator).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity(String);

impl Identity {
    /// Mint a fresh uuid7 backed identity under the given human readable prefix.
    pub fn generate(hrp: &str) -> anyhow::Result<Self> {
        Ok(Self(new_uuid_to_bech32(hrp)?))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Identity {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        bech32::decode(s)
            .map_err(|e| EngineError::InvalidInput(format!("identity {s:?}: {e}")))?;
        Ok(Self(s.to_owned()))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<C> minicbor::Encode<C> for Identity {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Identity {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(Identity(d.str()?.to_owned()))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InvoiceStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Factored,
    #[n(2)]
    Paid,
    #[n(3)]
    Defaulted,
}

impl InvoiceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Defaulted)
    }
    /// The directed lifecycle graph. Nothing ever leaves a terminal state.
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, next),
            (Pending, Factored) | (Factored, Paid) | (Pending, Defaulted) | (Factored, Defaulted)
        )
    }
}

impl TryFrom<u8> for InvoiceStatus {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(InvoiceStatus::Pending),
            1 => Ok(InvoiceStatus::Factored),
            2 => Ok(InvoiceStatus::Paid),
            3 => Ok(InvoiceStatus::Defaulted),
            other => Err(EngineError::InvalidInput(format!("unknown status code {other}"))),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub business: Identity,
    #[n(2)]
    pub debtor: Identity,
    #[n(3)]
    pub amount: u64, // face value, smallest unit
    #[n(4)]
    pub due_date: TimeStamp<Utc>,
    #[n(5)]
    pub status: InvoiceStatus,
    #[n(6)]
    pub investor: Option<Identity>,
    #[n(7)]
    pub factor_amount: u64,
    #[n(8)]
    pub collateral_amount: u64,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
    #[n(10)]
    pub collateral_deposited: bool,
    #[n(11)]
    pub escrowed_collateral: u64, // held until pay or default
    #[n(12)]
    pub insurance_fee: u64,
    #[n(13)]
    pub expected_return: u64,
    #[n(14)]
    pub settled_at: Option<TimeStamp<Utc>>,
}

impl Invoice {
    pub fn is_overdue(&self, now: &TimeStamp<Utc>) -> bool {
        *now > self.due_date
    }
}

// used for constructing invoices before they are submitted
#[derive(Debug, Default, Clone)]
pub struct InvoiceDraft {
    debtor: Option<Identity>,
    amount: u64,
    due_date: Option<TimeStamp<Utc>>,
}

impl InvoiceDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_debtor(mut self, debtor: Identity) -> Self {
        self.debtor = Some(debtor);
        self
    }
    pub fn set_amount(mut self, amount: u64) -> Self {
        self.amount = amount;
        self
    }
    pub fn set_due_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.due_date = Some(date);
        self
    }

    /// Checks the draft against `now` and produces the pending record for `business`.
    pub fn finalise(
        &self,
        id: u64,
        business: Identity,
        now: TimeStamp<Utc>,
    ) -> Result<Invoice, EngineError> {
        let Some(debtor) = self.debtor.clone() else {
            return Err(EngineError::InvalidInput("debtor is not set".into()));
        };
        if self.amount == 0 {
            return Err(EngineError::InvalidInput("amount must be positive".into()));
        }
        let Some(due_date) = self.due_date.clone() else {
            return Err(EngineError::InvalidInput("due date is not set".into()));
        };
        // stored as i64 nanoseconds
        if due_date.to_datetime_utc().timestamp_nanos_opt().is_none() {
            return Err(EngineError::InvalidInput(format!(
                "due date {due_date} is out of the storable range"
            )));
        }
        if due_date <= now {
            return Err(EngineError::InvalidInput(format!(
                "due date {due_date} is not after {now}"
            )));
        }

        Ok(Invoice {
            id,
            business,
            debtor,
            amount: self.amount,
            due_date,
            status: InvoiceStatus::Pending,
            investor: None,
            factor_amount: 0,
            collateral_amount: 0,
            created_at: now,
            collateral_deposited: false,
            escrowed_collateral: 0,
            insurance_fee: 0,
            expected_return: 0,
            settled_at: None,
        })
    }
}
