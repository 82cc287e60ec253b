use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::{self, Deserializer};
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::{Error, RollNumber};

/// One student's balances, as persisted under `students.<rollNumber>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub roll_number: RollNumber,
    #[serde(
        serialize_with = "serialize_amount",
        deserialize_with = "deserialize_amount_4dp"
    )]
    pub phone_pe: Decimal,
    #[serde(
        serialize_with = "serialize_amount",
        deserialize_with = "deserialize_amount_4dp"
    )]
    pub cash: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl StudentRecord {
    /// A zero-balance record, used when a roll number is written for the first time.
    pub fn empty(roll_number: RollNumber, now: DateTime<Utc>) -> Self {
        Self {
            roll_number,
            phone_pe: Decimal::ZERO,
            cash: Decimal::ZERO,
            last_updated: now,
        }
    }

    /// Never stored; always derived from the two balances.
    pub fn total(&self) -> Decimal {
        self.phone_pe + self.cash
    }

    pub fn get(&self, field: Field) -> Decimal {
        match field {
            Field::PhonePe => self.phone_pe,
            Field::Cash => self.cash,
        }
    }

    pub(crate) fn set(&mut self, field: Field, amount: Decimal) {
        match field {
            Field::PhonePe => self.phone_pe = amount,
            Field::Cash => self.cash = amount,
        }
    }
}

/// The whole persisted state: `{ "students": { "<roll>": StudentRecord } }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VaultData {
    #[serde(default)]
    pub students: HashMap<RollNumber, StudentRecord>,
}

impl VaultData {
    /// Checks the invariants that serde alone cannot: each key matches its
    /// record and no balance is negative.
    pub fn check_consistency(&self) -> Result<(), String> {
        for (key, record) in &self.students {
            if *key != record.roll_number {
                return Err(format!(
                    "key {key} holds record for {}",
                    record.roll_number
                ));
            }
            for field in Field::ALL {
                if record.get(field) < Decimal::ZERO {
                    return Err(format!("{key} has negative {field} balance"));
                }
            }
        }
        Ok(())
    }
}

/// Roster totals, as shown on the admin dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VaultSummary {
    pub students: usize,
    pub phone_pe: Decimal,
    pub cash: Decimal,
    pub grand_total: Decimal,
}

impl VaultSummary {
    pub fn from_records(records: &[StudentRecord]) -> Self {
        let phone_pe: Decimal = records.iter().map(|r| r.phone_pe).sum();
        let cash: Decimal = records.iter().map(|r| r.cash).sum();
        Self {
            students: records.len(),
            phone_pe,
            cash,
            grand_total: phone_pe + cash,
        }
    }
}

/// The two balance fields a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    PhonePe,
    Cash,
}

impl Field {
    pub const ALL: [Field; 2] = [Field::PhonePe, Field::Cash];
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::PhonePe => f.write_str("PhonePe"),
            Field::Cash => f.write_str("Cash"),
        }
    }
}

impl std::str::FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "phonepe" | "phone_pe" => Ok(Field::PhonePe),
            "cash" => Ok(Field::Cash),
            other => Err(format!("unknown field {other:?}, expected phonepe or cash")),
        }
    }
}

/// A partial write: `None` leaves the stored value untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BalanceUpdate {
    pub phone_pe: Option<Decimal>,
    pub cash: Option<Decimal>,
}

impl BalanceUpdate {
    pub fn both(phone_pe: Decimal, cash: Decimal) -> Self {
        Self {
            phone_pe: Some(phone_pe),
            cash: Some(cash),
        }
    }

    pub fn phone_pe(amount: Decimal) -> Self {
        Self {
            phone_pe: Some(amount),
            cash: None,
        }
    }

    pub fn cash(amount: Decimal) -> Self {
        Self {
            phone_pe: None,
            cash: Some(amount),
        }
    }

    pub(crate) fn fields(&self) -> impl Iterator<Item = (Field, Decimal)> {
        [(Field::PhonePe, self.phone_pe), (Field::Cash, self.cash)]
            .into_iter()
            .filter_map(|(field, amount)| amount.map(|a| (field, a)))
    }

    /// Truncates every provided amount to 4 dp and rejects negative or
    /// too-large ones before anything touches the store.
    pub fn normalize(self) -> Result<Self, Error> {
        let normalize = |field, amount: Option<Decimal>| {
            amount.map(|a| normalize_amount(field, a)).transpose()
        };
        Ok(Self {
            phone_pe: normalize(Field::PhonePe, self.phone_pe)?,
            cash: normalize(Field::Cash, self.cash)?,
        })
    }
}

/// Exclusive upper bound on a stored amount (10^11). A 4 dp amount below it
/// has at most 15 significant digits, which an f64 JSON number holds exactly.
pub const AMOUNT_LIMIT: Decimal = Decimal::from_parts(0x4876_E800, 0x17, 0, false, 0);

/// Parses user-typed amount text. Blank input means zero.
pub fn parse_amount(field: Field, input: &str) -> Result<Decimal, Error> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Decimal::ZERO);
    }
    let amount = trimmed
        .parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| Error::InvalidAmount {
            field,
            input: input.to_string(),
            reason: "not a number",
        })?;
    normalize_amount(field, amount)
}

fn normalize_amount(field: Field, amount: Decimal) -> Result<Decimal, Error> {
    let reject = |reason| Error::InvalidAmount {
        field,
        input: amount.to_string(),
        reason,
    };
    if amount < Decimal::ZERO {
        return Err(reject("amounts cannot be negative"));
    }
    let amount = amount.round_dp_with_strategy(4, RoundingStrategy::ToZero);
    if amount >= AMOUNT_LIMIT {
        return Err(reject("amounts must be below 100000000000"));
    }
    Ok(amount)
}

/// Amounts are JSON numbers on disk: integers when whole, floats otherwise.
fn serialize_amount<S>(amount: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if amount.fract().is_zero() {
        if let Some(whole) = amount.to_i64() {
            return serializer.serialize_i64(whole);
        }
    }
    let float = amount
        .to_f64()
        .ok_or_else(|| {
            <S::Error as ser::Error>::custom(format!("amount {amount} is not representable"))
        })?;
    serializer.serialize_f64(float)
}

fn deserialize_amount_4dp<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let float = f64::deserialize(deserializer)?;
    // The shortest round-trip text of the float, not its binary expansion.
    float
        .to_string()
        .parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_f64(float))
        .map(|dec| dec.round_dp_with_strategy(4, RoundingStrategy::ToZero))
        .ok_or_else(|| de::Error::custom(format!("amount {float} is out of range")))
}
