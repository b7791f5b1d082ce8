//! Trace and span identifiers.
//!
//! # Responsibilities
//! - Mint random, non-zero trace and span IDs
//! - Render IDs as fixed-width lowercase hex
//! - Carry the (trace_id, span_id, sampled) triple between spans and processes

use std::fmt;

use rand::Rng;
use serde::{Serialize, Serializer};

/// 128-bit identifier shared by every span of one trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

impl TraceId {
    /// Mint a random trace ID. Never zero.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let id: u128 = rng.gen();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn from_u128(id: u128) -> Self {
        Self(id)
    }

    pub fn to_u128(self) -> u128 {
        self.0
    }

    /// Parse exactly 32 lowercase hex digits.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 || !is_lower_hex(s) {
            return None;
        }
        u128::from_str_radix(s, 16).ok().map(Self)
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 64-bit identifier of a single span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl SpanId {
    /// Mint a random span ID. Never zero.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let id: u64 = rng.gen();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }

    pub fn to_u64(self) -> u64 {
        self.0
    }

    /// Parse exactly 16 lowercase hex digits.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 16 || !is_lower_hex(s) {
            return None;
        }
        u64::from_str_radix(s, 16).ok().map(Self)
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub(crate) fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Identity of one span within one trace.
///
/// Immutable: a child span gets a new `TraceContext` sharing `trace_id`
/// with a fresh `span_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: bool,
}

impl TraceContext {
    pub fn new(trace_id: TraceId, span_id: SpanId, sampled: bool) -> Self {
        Self {
            trace_id,
            span_id,
            sampled,
        }
    }

    /// Start a brand new trace.
    pub fn new_root(sampled: bool) -> Self {
        Self::new(TraceId::random(), SpanId::random(), sampled)
    }

    /// Context for a span nested under this one.
    pub fn child(&self) -> Self {
        Self::new(self.trace_id, SpanId::random(), self.sampled)
    }

    pub fn is_valid(&self) -> bool {
        self.trace_id.is_valid() && self.span_id.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_render_fixed_width() {
        assert_eq!(TraceId::from_u128(1).to_string(), "00000000000000000000000000000001");
        assert_eq!(SpanId::from_u64(0xab).to_string(), "00000000000000ab");
    }

    #[test]
    fn hex_parsing_is_strict() {
        assert!(SpanId::from_hex("00f067aa0ba902b7").is_some());
        assert!(SpanId::from_hex("00F067AA0BA902B7").is_none());
        assert!(SpanId::from_hex("00f067aa0ba902b").is_none());
        assert!(TraceId::from_hex("+bf92f3577b34da6a3ce929d0e0e4736").is_none());
    }

    #[test]
    fn child_keeps_trace_id() {
        let root = TraceContext::new_root(true);
        let child = root.child();
        assert_eq!(root.trace_id, child.trace_id);
        assert_ne!(root.span_id, child.span_id);
        assert!(child.sampled);
        assert!(child.is_valid());
    }
}
