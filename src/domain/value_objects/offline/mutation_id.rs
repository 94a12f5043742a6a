use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Identifier of a queued mutation: zero-padded enqueue time in milliseconds plus a random
/// tiebreaker, so ids sort in enqueue order when the clock is monotonic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutationId(String);

impl MutationId {
    pub fn generate(at: DateTime<Utc>) -> Self {
        let millis = at.timestamp_millis().max(0);
        let tiebreaker: u32 = rand::thread_rng().gen();
        Self(format!("{millis:013}-{tiebreaker:08x}"))
    }

    pub fn new(value: String) -> Result<Self, String> {
        Self::validate(&value)?;
        Ok(Self(value))
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        Self::validate(value)?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(value: &str) -> Result<(), String> {
        if value.trim().is_empty() {
            return Err("Mutation ID cannot be empty".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<MutationId> for String {
    fn from(id: MutationId) -> Self {
        id.0
    }
}

impl FromStr for MutationId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
