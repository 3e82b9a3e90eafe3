use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use kafka_bridge::kafka::{ConsumedMessage, OffsetMarker};
use rdkafka::error::KafkaError;
use tempfile::TempDir;

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("bridge.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

#[allow(dead_code)]
pub fn record(
    topic: &str,
    partition: i32,
    offset: i64,
    key: Option<&[u8]>,
    value: &[u8],
) -> ConsumedMessage {
    ConsumedMessage {
        topic: topic.to_string(),
        partition,
        offset,
        key: key.map(Bytes::copy_from_slice),
        value: Bytes::copy_from_slice(value),
        timestamp: Utc.timestamp_millis_opt(1_551_441_600_000).single(),
    }
}

/// Offset marker remembering every marked position
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryMarker {
    marked: Mutex<Vec<(String, i32, i64)>>,
}

#[allow(dead_code)]
impl MemoryMarker {
    pub fn marked(&self) -> Vec<(String, i32, i64)> {
        self.marked.lock().unwrap().clone()
    }
}

impl OffsetMarker for MemoryMarker {
    fn mark(&self, topic: &str, partition: i32, offset: i64) -> Result<(), KafkaError> {
        self.marked
            .lock()
            .unwrap()
            .push((topic.to_string(), partition, offset));
        Ok(())
    }
}
