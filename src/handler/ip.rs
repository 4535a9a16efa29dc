//! Client IP extraction from `X-Forwarded-For`/`Forwarded` headers.
//!
//! Grounded on `original_source/src/envoy/http/service_control/parsing_forwarded_header_fuzz_test.cc`,
//! which fuzzes `extractIPFromForwardedHeader` against raw `forwarded`
//! header values. Per §9's open question, the original only considers
//! the first `Forwarded` header value in some call sites but not
//! others; this module keeps that divergence rather than "fixing" it —
//! [`extract`] always reads only the first value of whichever header it
//! picks, but [`all_forwarded_for_hops`] (used by the report builder's
//! log-only path) walks every comma-separated hop.

use std::collections::HashMap;

/// Extracts the originating client IP per `client_ip_from_forwarded_header`.
///
/// When `use_forwarded_header` is set, prefers the standard `Forwarded`
/// header (`for=` directive) and falls back to `X-Forwarded-For`;
/// otherwise only `X-Forwarded-For` is consulted. Both are read
/// case-insensitively (`headers` keys are expected lower-cased, as
/// [`crate::handler::IncomingRequest`] stores them).
pub fn extract(headers: &HashMap<String, String>, use_forwarded_header: bool) -> Option<String> {
	if use_forwarded_header {
		if let Some(ip) = headers.get("forwarded").and_then(|v| first_forwarded_for(v)) {
			return Some(ip);
		}
	}
	headers.get("x-forwarded-for").and_then(|v| first_xff_hop(v))
}

/// The leftmost hop of an `X-Forwarded-For` value, which is the
/// original client in a well-formed proxy chain.
fn first_xff_hop(value: &str) -> Option<String> {
	value.split(',').next().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Pulls the `for=` directive out of the first element of a `Forwarded`
/// header value (RFC 7239). `for="[2001:db8::1]:8080"` and bare
/// `for=192.0.2.1` are both accepted; the optional quoting and port are
/// stripped.
fn first_forwarded_for(value: &str) -> Option<String> {
	let first_element = value.split(',').next()?;
	for directive in first_element.split(';') {
		let directive = directive.trim();
		let Some((key, val)) = directive.split_once('=') else { continue };
		if !key.trim().eq_ignore_ascii_case("for") {
			continue;
		}
		let val = val.trim().trim_matches('"');
		return Some(strip_port(val));
	}
	None
}

/// Strips a trailing `:port` (but not an IPv6 address's own colons)
/// from a `for=` value, and unwraps bracketed IPv6 literals.
fn strip_port(val: &str) -> String {
	if let Some(rest) = val.strip_prefix('[') {
		if let Some(end) = rest.find(']') {
			return rest[..end].to_string();
		}
		return rest.to_string();
	}
	match val.rsplit_once(':') {
		Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !host.contains(':') => host.to_string(),
		_ => val.to_string(),
	}
}

/// Every hop in `X-Forwarded-For`, left to right, for callers that want
/// the full chain rather than just the originating client (used by the
/// log builder when `log_request_headers` includes it verbatim).
pub fn all_forwarded_for_hops(value: &str) -> Vec<String> {
	value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}
