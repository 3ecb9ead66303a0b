//! Order files: the JSON batch the daemon executes.
//!
//! Either a bare array of orders, or an object that also seeds the
//! in-memory runtime and the scanner:
//!
//! ```json
//! {
//!   "instances": [{ "name": "billing", "environment": "staging", "image": "billing:v1" }],
//!   "scans": [{ "image": "billing:v9", "vulnerabilities": { "critical": 1, "high": 0, "medium": 0, "low": 0 } }],
//!   "orders": [{ "id": "o-1", "command": "deploy", "parameters": { ... } }]
//! }
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use slipway_core::{Order, SecurityScan};

/// An instance that exists before the first order runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedInstance {
    pub name: String,
    pub environment: String,
    pub image: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderFile {
    pub instances: Vec<SeedInstance>,
    /// Scan results returned for specific images; others scan clean.
    pub scans: Vec<SecurityScan>,
    pub orders: Vec<Order>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Shape {
    Bare(Vec<Order>),
    Full(OrderFile),
}

impl OrderFile {
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let shape: Shape = serde_json::from_str(content).context("invalid order file")?;
        Ok(match shape {
            Shape::Bare(orders) => OrderFile {
                orders,
                ..OrderFile::default()
            },
            Shape::Full(file) => file,
        })
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content)
    }
}
