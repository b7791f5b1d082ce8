//! Folded-stack CPU sample aggregation.
//!
//! Samples are keyed by a folded stack (`frame;frame;frame`) built from the
//! span names active while CPU was burned, so the profiling view lines up
//! with the trace view.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::observability::resource::ServiceIdentity;

pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 100;

/// Concurrent aggregate of CPU samples per stack.
#[derive(Clone)]
pub struct ProfileCollector {
    identity: ServiceIdentity,
    stacks: Arc<DashMap<String, u64>>,
    sample_rate_hz: u32,
}

impl ProfileCollector {
    pub fn new(identity: ServiceIdentity, sample_rate_hz: u32) -> Self {
        Self {
            identity,
            stacks: Arc::new(DashMap::new()),
            sample_rate_hz: sample_rate_hz.max(1),
        }
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    /// Attribute `cpu` time to the stack `frames` (outermost first).
    ///
    /// The service name is prepended as the root frame.
    pub fn record(&self, frames: &[&str], cpu: Duration) {
        let samples = (cpu.as_secs_f64() * f64::from(self.sample_rate_hz)).round() as u64;
        if samples == 0 {
            return;
        }
        let stack = std::iter::once(self.identity.service_name())
            .chain(frames.iter().copied())
            .map(sanitize_frame)
            .collect::<Vec<_>>()
            .join(";");
        *self.stacks.entry(stack).or_insert(0) += samples;
    }

    /// Current aggregate in folded format, one `stack count` line per stack,
    /// sorted by stack. Does not reset anything.
    pub fn folded(&self) -> String {
        let mut lines: Vec<(String, u64)> = self
            .stacks
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        lines.sort();
        render_folded(&lines)
    }

    /// Take every sample recorded so far, leaving the collector empty.
    pub fn drain(&self) -> Vec<(String, u64)> {
        let mut drained = Vec::new();
        self.stacks.retain(|stack, samples| {
            drained.push((stack.clone(), *samples));
            false
        });
        drained.sort();
        drained
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }
}

pub fn render_folded(stacks: &[(String, u64)]) -> String {
    stacks
        .iter()
        .map(|(stack, samples)| format!("{stack} {samples}\n"))
        .collect()
}

fn sanitize_frame(frame: &str) -> String {
    frame
        .chars()
        .map(|c| match c {
            ';' => ':',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}
