//! Host configuration
//!
//! Everything an embedder may want to change without code: the program's
//! arguments and environment, and the names under which the module exports
//! its memory and entry points.

use super::HostError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// argv, including the program name
    pub args: Vec<String>,
    /// Environment passed to the program, written in key order
    pub env: BTreeMap<String, String>,
    pub exports: ExportNames,
}

/// Names of the exports the host calls on the module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportNames {
    pub memory: String,
    pub stack_pointer: String,
    pub resume: String,
    pub run: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            args: vec!["js".to_string()],
            env: BTreeMap::new(),
            exports: ExportNames::default(),
        }
    }
}

impl Default for ExportNames {
    fn default() -> Self {
        ExportNames {
            memory: "mem".to_string(),
            stack_pointer: "getsp".to_string(),
            resume: "resume".to_string(),
            run: "run".to_string(),
        }
    }
}

impl HostConfig {
    /// Parse a JSON document; absent fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, HostError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader(reader: impl Read) -> Result<Self, HostError> {
        Ok(serde_json::from_reader(reader)?)
    }
}
