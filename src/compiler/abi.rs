//! ABI emission
//!
//! Every compiled module carries a machine-readable interface: its methods
//! with bytecode offsets, and for contracts the event table with embedded
//! description bytecode. The structures serialize to JSON for client
//! tooling.
//!
//! ## Shape
//! ```json
//! {
//!   "methods": [
//!     { "name": "Initialize", "kind": "constructor", "return_type": "none",
//!       "parameters": [ { "name": "owner", "type": "address" } ],
//!       "offset": 0 }
//!   ],
//!   "events": [
//!     { "name": "Paid", "value": 64, "payload_type": "number",
//!       "description": [ ... ] }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parser::MethodKind;

/// Interface of one compiled module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abi {
    /// Callable methods with their bytecode offsets
    pub methods: Vec<AbiMethod>,
    /// Event table; empty for scripts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<AbiEvent>,
}

/// One callable entry point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiMethod {
    /// Method name
    pub name: String,
    /// Callable kind
    pub kind: MethodKind,
    /// Rendered return type name, `none` for void methods
    pub return_type: String,
    /// Parameters in declaration order
    pub parameters: Vec<AbiParameter>,
    /// Byte offset of the method entry in the module bytecode
    pub offset: u32,
}

/// One method parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiParameter {
    /// Parameter name
    pub name: String,
    /// Rendered type name
    #[serde(rename = "type")]
    pub ty: String,
}

/// One declared event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiEvent {
    /// Event name
    pub name: String,
    /// Numeric event value
    pub value: u32,
    /// Rendered payload type name
    pub payload_type: String,
    /// Compiled description script bytecode
    pub description: Vec<u8>,
}

impl Abi {
    /// Render the ABI as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::internal(format!("ABI serialization failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Abi {
        Abi {
            methods: vec![AbiMethod {
                name: "Initialize".to_string(),
                kind: MethodKind::Constructor,
                return_type: "none".to_string(),
                parameters: vec![AbiParameter {
                    name: "owner".to_string(),
                    ty: "address".to_string(),
                }],
                offset: 0,
            }],
            events: vec![AbiEvent {
                name: "Paid".to_string(),
                value: 64,
                payload_type: "number".to_string(),
                description: vec![1, 2, 3],
            }],
        }
    }

    #[test]
    fn test_json_round_trip() {
        let abi = sample();
        let json = abi.to_json().expect("serializes");
        let back: Abi = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(abi, back);
    }

    #[test]
    fn test_kind_renders_snake_case() {
        let json = sample().to_json().unwrap();
        assert!(json.contains("\"constructor\""));
        assert!(json.contains("\"type\": \"address\""));
    }

    #[test]
    fn test_empty_event_table_is_omitted() {
        let abi = Abi {
            methods: vec![],
            events: vec![],
        };
        let json = abi.to_json().unwrap();
        assert!(!json.contains("events"));
    }
}
