use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

/// Deterministic backend that replays scripted detections.
///
/// Each `detect` call returns the next script entry, cycling when the script is
/// exhausted. Selected calls can be made to fail to exercise error paths.
pub struct ScriptedBackend {
    script: Vec<Vec<RawDetection>>,
    failing_calls: BTreeSet<u64>,
    calls: Arc<AtomicU64>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Vec<RawDetection>>) -> Self {
        Self {
            script,
            failing_calls: BTreeSet::new(),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Same detections on every call.
    pub fn repeating(detections: Vec<RawDetection>) -> Self {
        Self::new(vec![detections])
    }

    /// Make the given calls (1-based) fail.
    pub fn failing_on(mut self, calls: impl IntoIterator<Item = u64>) -> Self {
        self.failing_calls.extend(calls);
        self
    }

    /// Shared count of `detect` calls, readable after the backend moves into an engine.
    pub fn call_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.calls)
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn class_names(&self) -> Vec<String> {
        let labels: BTreeSet<&str> = self
            .script
            .iter()
            .flatten()
            .map(|d| d.label.as_str())
            .collect();
        labels.into_iter().map(str::to_string).collect()
    }

    fn detect(
        &mut self,
        _pixels: &[u8],
        _width: u32,
        _height: u32,
        confidence_floor: f32,
    ) -> Result<Vec<RawDetection>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_calls.contains(&call) {
            return Err(anyhow!("scripted failure on call {call}"));
        }
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let entry = &self.script[((call - 1) % self.script.len() as u64) as usize];
        Ok(entry
            .iter()
            .filter(|d| d.confidence >= confidence_floor)
            .cloned()
            .collect())
    }
}
