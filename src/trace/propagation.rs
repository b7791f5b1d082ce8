//! W3C `traceparent` propagation.
//!
//! ```text
//! traceparent: 00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01
//!              ^^ ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^ ^^^^^^^^^^^^^^^^ ^^
//!         version           trace-id                  span-id     flags
//! ```
//!
//! Decoding never fails loudly: anything malformed extracts as `None` and the
//! caller starts a new trace.

use std::collections::HashMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::trace::context::{is_lower_hex, SpanId, TraceContext, TraceId};

pub const TRACEPARENT_HEADER: &str = "traceparent";

const SUPPORTED_VERSION: u8 = 0;
const INVALID_VERSION: u8 = 0xff;
const FLAG_SAMPLED: u8 = 0x01;

/// Write side of a propagation carrier.
pub trait Injector {
    fn set(&mut self, key: &str, value: String);
}

/// Read side of a propagation carrier.
pub trait Extractor {
    fn get(&self, key: &str) -> Option<&str>;
}

impl Injector for HeaderMap {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.insert(name, value);
        }
    }
}

impl Extractor for HeaderMap {
    fn get(&self, key: &str) -> Option<&str> {
        HeaderMap::get(self, key).and_then(|v| v.to_str().ok())
    }
}

impl Injector for HashMap<String, String> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_ascii_lowercase(), value);
    }
}

impl Extractor for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, &key.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Encodes and decodes [`TraceContext`] in the `traceparent` format.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceContextPropagator;

impl TraceContextPropagator {
    pub fn new() -> Self {
        Self
    }

    pub fn inject(&self, cx: &TraceContext, carrier: &mut dyn Injector) {
        if cx.is_valid() {
            carrier.set(TRACEPARENT_HEADER, encode(cx));
        }
    }

    pub fn extract(&self, carrier: &dyn Extractor) -> Option<TraceContext> {
        carrier.get(TRACEPARENT_HEADER).and_then(decode)
    }
}

/// Render a context as a `traceparent` value.
pub fn encode(cx: &TraceContext) -> String {
    let flags = if cx.sampled { FLAG_SAMPLED } else { 0 };
    format!(
        "{:02x}-{}-{}-{:02x}",
        SUPPORTED_VERSION, cx.trace_id, cx.span_id, flags
    )
}

/// Parse a `traceparent` value.
pub fn decode(value: &str) -> Option<TraceContext> {
    let parts: Vec<&str> = value.trim().split('-').collect();
    if parts.len() < 4 {
        return None;
    }

    if parts[0].len() != 2 || !is_lower_hex(parts[0]) {
        return None;
    }
    let version = u8::from_str_radix(parts[0], 16).ok()?;
    if version == INVALID_VERSION {
        return None;
    }
    // Version 00 is exactly four fields; later versions may append more.
    if version == SUPPORTED_VERSION && parts.len() != 4 {
        return None;
    }

    let trace_id = TraceId::from_hex(parts[1])?;
    let span_id = SpanId::from_hex(parts[2])?;

    if parts[3].len() != 2 || !is_lower_hex(parts[3]) {
        return None;
    }
    let flags = u8::from_str_radix(parts[3], 16).ok()?;

    let cx = TraceContext::new(trace_id, span_id, flags & FLAG_SAMPLED != 0);
    cx.is_valid().then_some(cx)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn decodes_valid_header() {
        let cx = decode(VALID).unwrap();
        assert_eq!(cx.trace_id, TraceId::from_u128(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736));
        assert_eq!(cx.span_id, SpanId::from_u64(0x00f0_67aa_0ba9_02b7));
        assert!(cx.sampled);
    }

    #[test]
    fn roundtrip_through_headers() {
        let propagator = TraceContextPropagator::new();
        for sampled in [true, false] {
            let cx = TraceContext::new_root(sampled);
            let mut headers = HeaderMap::new();
            propagator.inject(&cx, &mut headers);
            assert_eq!(propagator.extract(&headers), Some(cx));
        }
    }

    #[test]
    fn roundtrip_through_map() {
        let propagator = TraceContextPropagator::new();
        let cx = TraceContext::new_root(true);
        let mut carrier = HashMap::new();
        propagator.inject(&cx, &mut carrier);
        assert_eq!(carrier.get("traceparent").map(String::as_str), Some(encode(&cx).as_str()));
        assert_eq!(propagator.extract(&carrier), Some(cx));
    }

    #[test]
    fn future_versions_are_accepted_when_lengths_match() {
        let cx = decode("02-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-09-extra").unwrap();
        assert!(cx.sampled);
        assert!(decode("01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00").is_some());
    }

    #[test]
    fn flags_keep_only_sampled_bit() {
        let cx = decode("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00").unwrap();
        assert!(!cx.sampled);
    }

    #[test]
    fn malformed_values_extract_as_none() {
        let cases = [
            "",
            "garbage",
            "0000-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e473-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-001",
            "qw-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e47zz-00f067aa0ba902b7-01",
            "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
            "00-+bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        ];
        for case in cases {
            assert_eq!(decode(case), None, "expected {case:?} to be rejected");
        }
    }

    #[test]
    fn missing_header_extracts_as_none() {
        let propagator = TraceContextPropagator::new();
        assert_eq!(propagator.extract(&HeaderMap::new()), None);
    }
}
