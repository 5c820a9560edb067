//! Benchmark rows, keyed by MTU, in the JSON layout sweep tooling appends to
//! and analysis tooling reads.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::metrics;
use crate::transfer::TransferResult;

/// MTU (as a string key) -> rows measured at that MTU
pub type ResultSet = BTreeMap<String, Vec<BenchmarkRecord>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub gap_ms: u64,
    #[serde(alias = "rf_throughput")]
    pub throughput: f64,
    #[serde(default)]
    pub expected_throughput: f64,
    pub loss: f64,
    #[serde(default)]
    pub crc_failure_percent: f64,
    pub packets_received: usize,
    pub packets_expected: usize,
    #[serde(default)]
    pub timeouts: u32,
    #[serde(default)]
    pub aborted: bool,
}

impl BenchmarkRecord {
    pub fn from_result(result: &TransferResult, mtu: usize, gap_ms: u64, baud_rate: u32) -> Self {
        Self {
            gap_ms,
            throughput: result.effective_throughput,
            expected_throughput: metrics::expected_throughput(mtu, gap_ms, baud_rate),
            loss: result.loss_percent,
            crc_failure_percent: result.crc_failure_percent(),
            packets_received: result.chunks_received,
            packets_expected: result.chunks_total,
            timeouts: result.timeouts,
            aborted: result.aborted,
        }
    }

    pub fn goodput(&self) -> f64 {
        metrics::goodput(self.throughput, self.loss)
    }
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn append(&self, mtu: usize, record: &BenchmarkRecord) -> anyhow::Result<()>;

    async fn load(&self) -> anyhow::Result<ResultSet>;
}

/// Whole-file JSON store, rewritten on every append
pub struct JsonResultStore {
    path: PathBuf,
}

impl JsonResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ResultStore for JsonResultStore {
    async fn append(&self, mtu: usize, record: &BenchmarkRecord) -> anyhow::Result<()> {
        let mut results = self.load().await?;
        results.entry(mtu.to_string()).or_default().push(record.clone());
        fs::write(&self.path, serde_json::to_vec_pretty(&results)?).await?;
        tracing::debug!("Appended result row for mtu {} to {:?}", mtu, self.path);
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<ResultSet> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ResultSet::new()),
            Err(e) => Err(e.into()),
        }
    }
}
