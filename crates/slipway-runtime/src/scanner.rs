//! The security scanner capability.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use slipway_core::SecurityScan;

use crate::error::{RuntimeError, RuntimeResult};

#[async_trait]
pub trait SecurityScanner: Send + Sync {
    async fn scan_image(&self, image: &str) -> RuntimeResult<SecurityScan>;
}

/// Scanner answering from a fixed table; unknown images scan clean.
#[derive(Debug, Default)]
pub struct StaticScanner {
    results: RwLock<HashMap<String, SecurityScan>>,
}

impl StaticScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the scan returned for `image`.
    pub fn with_result(self, image: &str, scan: SecurityScan) -> Self {
        if let Ok(mut results) = self.results.write() {
            results.insert(image.to_string(), scan);
        }
        self
    }
}

#[async_trait]
impl SecurityScanner for StaticScanner {
    async fn scan_image(&self, image: &str) -> RuntimeResult<SecurityScan> {
        let results = self
            .results
            .read()
            .map_err(|_| RuntimeError::Unavailable("scanner table poisoned".into()))?;
        let scan = results.get(image).cloned().unwrap_or_else(|| SecurityScan {
            image: image.to_string(),
            ..SecurityScan::default()
        });
        debug!(%image, critical = scan.vulnerabilities.critical, "image scanned");
        Ok(scan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slipway_core::VulnerabilityCounts;

    #[tokio::test]
    async fn unknown_images_scan_clean() {
        let scanner = StaticScanner::new();
        let scan = scanner.scan_image("billing:v2").await.unwrap();
        assert_eq!(scan.image, "billing:v2");
        assert_eq!(scan.vulnerabilities.critical, 0);
    }

    #[tokio::test]
    async fn registered_result_is_returned() {
        let scanner = StaticScanner::new().with_result(
            "billing:v3",
            SecurityScan {
                image: "billing:v3".into(),
                vulnerabilities: VulnerabilityCounts {
                    critical: 2,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let scan = scanner.scan_image("billing:v3").await.unwrap();
        assert_eq!(scan.vulnerabilities.critical, 2);
    }
}
