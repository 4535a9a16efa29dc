//! Path-matcher trie (C2).
//!
//! An ordered-alternative trie keyed by `(method, segmented path)` with
//! longest-specific-wins lookup and variable-binding extraction. Mirrors
//! the teacher's route-matching layer (`types/agent.rs`'s `PathMatch`)
//! generalized from Gateway-API exact/prefix/regex matching to the full
//! Google HTTP-rule template grammar, per `original_source/src/api_proxy/
//! path_matcher/path_matcher.cc`.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::collections::HashSet;

use crate::template::{HttpTemplate, Segment};

pub const WILDCARD_METHOD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableBinding {
	pub field_path: Vec<String>,
	pub value: String,
}

/// Data attached to a successful terminal: the handle the caller
/// registered plus enough of the parsed template to extract bindings.
#[derive(Debug, Clone)]
pub struct MethodData {
	pub operation_id: String,
	pub variables: Vec<crate::template::Variable>,
	pub body_field_path: String,
}

#[derive(Default)]
struct MatcherNode {
	literal_children: HashMap<Box<str>, MatcherNode>,
	single_wildcard_child: Option<Box<MatcherNode>>,
	double_wildcard_child: Option<Box<MatcherNode>>,
	/// method -> index into PathMatcher::methods
	terminals: HashMap<Box<str>, usize>,
}

impl MatcherNode {
	fn child_for(&mut self, seg: &Segment) -> &mut MatcherNode {
		match seg {
			Segment::Literal(s) => self
				.literal_children
				.entry(s.clone())
				.or_insert_with(MatcherNode::default),
			Segment::SingleWildcard => self
				.single_wildcard_child
				.get_or_insert_with(|| Box::new(MatcherNode::default())),
			Segment::DoubleWildcard => self
				.double_wildcard_child
				.get_or_insert_with(|| Box::new(MatcherNode::default())),
		}
	}
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RegisterError {
	#[error("template parse error: {0}")]
	Template(#[from] crate::template::Error),
	#[error("a terminal is already registered for this (method, template)")]
	DuplicateTerminal,
}

pub struct Builder {
	root: MatcherNode,
	methods: Vec<MethodData>,
	custom_verbs: HashSet<String>,
}

impl Builder {
	pub fn new() -> Self {
		Self {
			root: MatcherNode::default(),
			methods: Vec::new(),
			custom_verbs: HashSet::new(),
		}
	}

	/// Parse `template_string`, insert it into the trie for `method`, and
	/// record `method_handle` as its terminal payload. Returns `false`
	/// (without mutating matcher state) if the template fails to parse or
	/// the exact `(method, segments, verb)` key already has a terminal —
	/// registration is all-or-nothing.
	pub fn register(
		&mut self,
		method: &str,
		template_string: &str,
		body_field_path: &str,
		method_handle: impl Into<String>,
	) -> Result<bool, RegisterError> {
		let template = HttpTemplate::parse(template_string)?;

		// Walk without mutating first, so a duplicate leaves the trie untouched.
		if self.lookup_exact_terminal(method, &template).is_some() {
			return Ok(false);
		}

		let mut node = &mut self.root;
		for seg in &template.segments {
			node = node.child_for(seg);
		}
		let verb_key = verb_terminal_key(&template.verb);
		let idx = self.methods.len();
		self.methods.push(MethodData {
			operation_id: method_handle.into(),
			variables: template.variables,
			body_field_path: body_field_path.to_string(),
		});
		let terminal_key = format!("{method}{verb_key}").into_boxed_str();
		node.terminals.insert(terminal_key, idx);

		if let Some(verb) = &template.verb {
			if !verb.is_empty() {
				self.custom_verbs.insert(verb.clone());
			}
		}

		Ok(true)
	}

	fn lookup_exact_terminal(&self, method: &str, template: &HttpTemplate) -> Option<usize> {
		let mut node = &self.root;
		for seg in &template.segments {
			node = match seg {
				Segment::Literal(s) => node.literal_children.get(s.as_ref())?,
				Segment::SingleWildcard => node.single_wildcard_child.as_deref()?,
				Segment::DoubleWildcard => node.double_wildcard_child.as_deref()?,
			};
		}
		let key = format!("{method}{}", verb_terminal_key(&template.verb));
		node.terminals.get(key.as_str()).copied()
	}

	pub fn build(self) -> PathMatcher {
		PathMatcher {
			root: self.root,
			methods: self.methods,
			custom_verbs: self.custom_verbs,
		}
	}
}

impl Default for Builder {
	fn default() -> Self {
		Self::new()
	}
}

/// Terminals are additionally keyed by verb so two templates differing
/// only in `:verb` don't collide.
fn verb_terminal_key(verb: &Option<String>) -> String {
	match verb {
		Some(v) if !v.is_empty() => format!(":{v}"),
		_ => String::new(),
	}
}

pub struct PathMatcher {
	root: MatcherNode,
	methods: Vec<MethodData>,
	custom_verbs: HashSet<String>,
}

pub struct Match<'a> {
	pub method_data: &'a MethodData,
	pub bindings: Vec<VariableBinding>,
}

impl PathMatcher {
	pub fn builder() -> Builder {
		Builder::new()
	}

	/// Segment an incoming `(method, raw_path)` request and look it up.
	pub fn lookup(&self, method: &str, raw_path: &str) -> Option<Match<'_>> {
		let (segments, verb) = segmentize(raw_path, &self.custom_verbs);
		let method_data = self.lookup_segments(method, &segments, &verb)?;
		let bindings = extract_bindings(method_data, &segments);
		Some(Match {
			method_data,
			bindings,
		})
	}

	fn lookup_segments(&self, method: &str, segments: &[String], verb: &str) -> Option<&MethodData> {
		let idx = descend(&self.root, segments, 0)?;
		let node = idx;
		let verb_key = verb_terminal_key(&if verb.is_empty() {
			None
		} else {
			Some(verb.to_string())
		});
		let exact_key = format!("{method}{verb_key}");
		let method_idx = node
			.terminals
			.get(exact_key.as_str())
			.or_else(|| {
				let wildcard_key = format!("{WILDCARD_METHOD}{verb_key}");
				node.terminals.get(wildcard_key.as_str())
			})
			.copied()?;
		self.methods.get(method_idx)
	}
}

/// Descend the trie for `segments[from..]`, returning the terminal node
/// reached exactly at the end of the path (no partial matches).
///
/// Ordering: literal > `*` > `**`. Within `**`, the longest literal
/// suffix wins; ties break toward fewer wildcard segments consumed. An
/// empty segment never matches `**`.
fn descend<'a>(node: &'a MatcherNode, segments: &[String], from: usize) -> Option<&'a MatcherNode> {
	if from == segments.len() {
		return Some(node);
	}
	let seg = &segments[from];

	if let Some(child) = node.literal_children.get(seg.as_str()) {
		if let Some(found) = descend(child, segments, from + 1) {
			return Some(found);
		}
	}
	if !seg.is_empty() {
		if let Some(child) = node.single_wildcard_child.as_deref() {
			if let Some(found) = descend(child, segments, from + 1) {
				return Some(found);
			}
		}
	}
	if let Some(child) = node.double_wildcard_child.as_deref() {
		return best_double_wildcard_match(child, segments, from);
	}
	None
}

/// `**` speculatively consumes a non-empty-containing prefix of the
/// remaining path, shortest first, so the longest possible tail is left
/// for the child trie to match as a literal suffix. The first consumption
/// length that reaches a terminal wins, giving the longest-literal-suffix
/// and fewest-wildcard-segments tie-break described in the spec.
fn best_double_wildcard_match<'a>(
	child: &'a MatcherNode,
	segments: &[String],
	from: usize,
) -> Option<&'a MatcherNode> {
	let remaining = &segments[from..];
	if remaining.iter().any(|s| s.is_empty()) {
		// An empty segment in the middle of a path must not match `**`.
		return None;
	}
	if remaining.is_empty() {
		return None;
	}
	// Try consuming the fewest segments first so the longest possible
	// literal/terminal suffix under `child` is preferred; `descend`
	// already prefers literal matches over wildcards at each node, so
	// trying split points from smallest consumption upward and keeping
	// the first full match gives the "longest literal suffix" winner
	// while letting `descend`'s own literal-first order pick it.
	for consumed in 1..=remaining.len() {
		if let Some(found) = descend(child, segments, from + consumed) {
			return Some(found);
		}
	}
	None
}

/// Segment a raw request path: strip query, fold a configured custom verb
/// out of a trailing `:verb` into its own segment, split on `/`, and
/// collapse leading/trailing empties.
pub fn segmentize(raw_path: &str, custom_verbs: &HashSet<String>) -> (Vec<String>, String) {
	let path = raw_path.split('?').next().unwrap_or(raw_path);

	let last_slash = path.rfind('/');
	let last_colon = path.rfind(':');
	let mut verb = String::new();
	let mut path_no_verb = path;
	if let Some(c) = last_colon {
		let colon_after_slash = match last_slash {
			Some(p) => c > p,
			None => true,
		};
		if colon_after_slash {
			let candidate = &path[c + 1..];
			if custom_verbs.contains(candidate) {
				verb = candidate.to_string();
				path_no_verb = &path[..c];
			}
		}
	}

	let mut segments: Vec<String> = path_no_verb.split('/').map(|s| s.to_string()).collect();
	if segments.first().map(|s| s.is_empty()).unwrap_or(false) {
		segments.remove(0);
	}
	while segments.last().map(|s| s.is_empty()).unwrap_or(false) {
		segments.pop();
	}
	(segments, verb)
}

fn extract_bindings(method_data: &MethodData, segments: &[String]) -> Vec<VariableBinding> {
	let total = segments.len();
	method_data
		.variables
		.iter()
		.map(|v| {
			let (start, end) = v.absolute_range(total);
			let end = end.min(total).max(start);
			let raw = segments[start..end].join("/");
			let value = if end.saturating_sub(start) == 1 {
				decode_unreserved(&raw)
			} else {
				raw
			};
			VariableBinding {
				field_path: v.field_path.clone(),
				value,
			}
		})
		.collect()
}

/// Percent-decode only escapes of RFC 3986 "unreserved" octets
/// (`ALPHA / DIGIT / "-" / "." / "_" / "~"`); every other `%XX` escape,
/// notably `%2F`, is left in the output untouched. Single-segment
/// bindings use this (never the full percent-decode a generic URL
/// decoder would apply) so a caller cannot smuggle an extra `/` into a
/// binding by escaping it — matching
/// `path_matcher_test.cc::PercentEscapesUnescapedForSingleSegment`.
fn decode_unreserved(raw: &str) -> String {
	let bytes = raw.as_bytes();
	let mut out = Vec::with_capacity(bytes.len());
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == b'%' && i + 2 < bytes.len() {
			if let (Some(h), Some(l)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
				let decoded = (h << 4) | l;
				if is_unreserved_byte(decoded) {
					out.push(decoded);
					i += 3;
					continue;
				}
			}
		}
		out.push(bytes[i]);
		i += 1;
	}
	String::from_utf8(out).unwrap_or_else(|_| raw.to_string())
}

fn hex_val(b: u8) -> Option<u8> {
	match b {
		b'0'..=b'9' => Some(b - b'0'),
		b'a'..=b'f' => Some(b - b'a' + 10),
		b'A'..=b'F' => Some(b - b'A' + 10),
		_ => None,
	}
}

fn is_unreserved_byte(b: u8) -> bool {
	b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}
