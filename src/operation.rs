//! Operation envelope: the application-level commands (`PUT`, `DEL`, `ADD`)
//! serialized into a [`crate::entry::LogEntry`] payload.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "UPPERCASE")]
pub enum Operation {
    Put { key: String, value: Vec<u8> },
    Del { key: String },
    Add { value: Vec<u8> },
}

impl Operation {
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Operation {
        Operation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn del(key: impl Into<String>) -> Operation {
        Operation::Del { key: key.into() }
    }

    pub fn add(value: impl Into<Vec<u8>>) -> Operation {
        Operation::Add { value: value.into() }
    }

    pub fn marshal(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(StoreError::Json)
    }

    pub fn parse(bytes: &[u8]) -> Result<Operation> {
        serde_json::from_slice(bytes).map_err(StoreError::Json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_round_trips_through_json() {
        let op = Operation::put("a", b"1".to_vec());
        let bytes = op.marshal().unwrap();
        assert_eq!(Operation::parse(&bytes).unwrap(), op);
    }

    #[test]
    fn del_round_trips_through_json() {
        let op = Operation::del("a");
        let bytes = op.marshal().unwrap();
        assert_eq!(Operation::parse(&bytes).unwrap(), op);
    }
}
