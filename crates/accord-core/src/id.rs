//! Stable ID newtypes for registry entities.
//!
//! Contract, criterion and party identifiers are caller-chosen strings; event
//! identifiers are generated UUIDs. All are distinct newtypes so that a
//! `PartyId` cannot be accidentally used where a `ContractId` is expected.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable contract identifier. Orders lexically, which is the tie-break used
/// inside execution-plan batches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(pub String);

/// Criterion identifier, unique within one contract.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CriterionId(pub String);

/// An actor: provider, consumer, validator or operator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(pub String);

/// Identity of one appended contract event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        EventId(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name(value)
            }
        }
    };
}

string_id!(ContractId);
string_id!(CriterionId);
string_id!(PartyId);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_ids_order_lexically() {
        let mut ids = vec![
            ContractId::from("c10"),
            ContractId::from("c2"),
            ContractId::from("a1"),
        ];
        ids.sort();
        let rendered: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(rendered, vec!["a1", "c10", "c2"]);
    }

    #[test]
    fn display_prints_inner_value() {
        assert_eq!(format!("{}", ContractId::from("C1")), "C1");
        assert_eq!(format!("{}", PartyId::from("team-a")), "team-a");
        assert_eq!(format!("{}", CriterionId::from("latency")), "latency");
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = ContractId::from("C1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"C1\"");
        let back: ContractId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn event_ids_are_unique() {
        assert_ne!(EventId::new(), EventId::new());
    }
}
