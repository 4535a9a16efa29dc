//! URI-template parser (C1).
//!
//! Parses the Google HTTP-rule template grammar:
//!
//! ```text
//! Template   = "/" Segments [ Verb ]
//! Segments   = Segment { "/" Segment }
//! Segment    = "*" | "**" | Literal | Variable
//! Variable   = "{" FieldPath [ "=" Segments ] "}"
//! FieldPath  = Ident { "." Ident }
//! Verb       = ":" Literal
//! ```
//!
//! The parser flattens variable bodies into a single top-level segment
//! list and records each variable as a separate [`Variable`] descriptor
//! pointing back into that list by range, per the "variables point back
//! into segments" design note: this avoids re-walking a tree to extract
//! bindings at lookup time.

#[cfg(test)]
mod tests;

use std::fmt;

/// A single matched element of a flattened, parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
	Literal(Box<str>),
	SingleWildcard,
	DoubleWildcard,
}

/// A variable binding site, recorded as a half-open range `[start_segment,
/// end_segment)` into the owning template's (or, after a match, the
/// request's) segment list.
///
/// `end_segment` is non-negative when the variable's width is fixed from
/// the front of the template. It is negative when the variable's body
/// contains `**` (unbounded width): the encoding is `-(tail_len + 1)`,
/// where `tail_len` is the number of fixed literal segments the template
/// requires after this variable. [`Variable::absolute_range`] resolves
/// either encoding against a concrete segment count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
	pub field_path: Vec<String>,
	pub start_segment: i32,
	pub end_segment: i32,
}

impl Variable {
	/// Resolve this variable's range against a segment list of length
	/// `total_segments` (a matched request path's segment count).
	pub fn absolute_range(&self, total_segments: usize) -> (usize, usize) {
		let start = self.start_segment as usize;
		let end = if self.end_segment >= 0 {
			self.end_segment as usize
		} else {
			(total_segments as i32 + self.end_segment + 1) as usize
		};
		(start, end)
	}

	pub fn is_unbounded(&self) -> bool {
		self.end_segment < 0
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTemplate {
	pub segments: Vec<Segment>,
	pub variables: Vec<Variable>,
	pub verb: Option<String>,
}

impl HttpTemplate {
	pub fn parse(template: &str) -> Result<Self, Error> {
		Parser::new(template).parse_template()
	}

	/// Number of `**` occurrences across the whole template (top level and
	/// inlined variable bodies). Used by the matcher to size its literal
	/// suffix search; always 0 or 1 after a successful parse.
	pub fn has_double_wildcard(&self) -> bool {
		self.segments.iter().any(|s| *s == Segment::DoubleWildcard)
	}
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
	#[error("template must start with '/'")]
	MissingLeadingSlash,
	#[error("unbalanced braces in template")]
	UnbalancedBraces,
	#[error("nested variables are not allowed")]
	NestedVariable,
	#[error("empty segment in template")]
	EmptySegment,
	#[error("empty field path in variable")]
	EmptyFieldPath,
	#[error("more than one '**' in template")]
	MultipleDoubleWildcards,
	#[error("'**' must be followed only by literal segments or a verb")]
	DoubleWildcardNotInTail,
	#[error("empty verb after ':'")]
	EmptyVerb,
	#[error("invalid character {0:?} in literal segment")]
	InvalidLiteralChar(char),
}

struct Parser<'a> {
	src: &'a str,
}

impl<'a> Parser<'a> {
	fn new(src: &'a str) -> Self {
		Self { src }
	}

	fn parse_template(&mut self) -> Result<HttpTemplate, Error> {
		let rest = self.src.strip_prefix('/').ok_or(Error::MissingLeadingSlash)?;
		let (path_part, verb) = split_verb(rest)?;

		let mut segments = Vec::new();
		let mut variables = Vec::new();
		if !path_part.is_empty() {
			for raw in split_top_level(path_part) {
				parse_segment(raw, &mut segments, &mut variables)?;
			}
		}

		validate_double_wildcard(&segments)?;
		resolve_unbounded_ends(&segments, &mut variables);

		Ok(HttpTemplate {
			segments,
			variables,
			verb,
		})
	}
}

/// Split off a trailing `:verb`, if any, at brace-depth 0.
fn split_verb(s: &str) -> Result<(&str, Option<String>), Error> {
	let mut depth: i32 = 0;
	let mut verb_at = None;
	for (i, c) in s.char_indices() {
		match c {
			'{' => depth += 1,
			'}' => {
				depth -= 1;
				if depth < 0 {
					return Err(Error::UnbalancedBraces);
				}
			},
			':' if depth == 0 => verb_at = Some(i),
			_ => {},
		}
	}
	if depth != 0 {
		return Err(Error::UnbalancedBraces);
	}
	match verb_at {
		None => Ok((s, None)),
		Some(i) => {
			let verb = &s[i + 1..];
			if verb.is_empty() {
				return Err(Error::EmptyVerb);
			}
			Ok((&s[..i], Some(verb.to_string())))
		},
	}
}

/// Split a path (no leading slash, no verb) into top-level segment
/// strings, respecting brace nesting so a variable body's internal `/`
/// doesn't split it.
fn split_top_level(s: &str) -> Vec<&str> {
	let mut out = Vec::new();
	let mut depth = 0i32;
	let mut start = 0usize;
	for (i, c) in s.char_indices() {
		match c {
			'{' => depth += 1,
			'}' => depth -= 1,
			'/' if depth == 0 => {
				out.push(&s[start..i]);
				start = i + 1;
			},
			_ => {},
		}
	}
	out.push(&s[start..]);
	out
}

fn parse_segment(
	raw: &str,
	segments: &mut Vec<Segment>,
	variables: &mut Vec<Variable>,
) -> Result<(), Error> {
	if raw.is_empty() {
		return Err(Error::EmptySegment);
	}
	if let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
		parse_variable(inner, segments, variables)
	} else {
		validate_literal_chars(raw)?;
		segments.push(simple_segment(raw));
		Ok(())
	}
}

fn parse_variable(
	inner: &str,
	segments: &mut Vec<Segment>,
	variables: &mut Vec<Variable>,
) -> Result<(), Error> {
	if inner.contains('{') || inner.contains('}') {
		return Err(Error::NestedVariable);
	}
	let (field_path_str, body_str) = match inner.split_once('=') {
		Some((f, b)) => (f, b),
		None => (inner, "*"),
	};
	let field_path: Vec<String> = field_path_str
		.split('.')
		.map(|s| s.to_string())
		.collect::<Vec<_>>();
	if field_path.is_empty() || field_path.iter().any(|p| p.is_empty()) {
		return Err(Error::EmptyFieldPath);
	}

	let start = segments.len() as i32;
	for raw in split_top_level(body_str) {
		if raw.is_empty() {
			return Err(Error::EmptySegment);
		}
		if raw.starts_with('{') {
			return Err(Error::NestedVariable);
		}
		validate_literal_chars(raw)?;
		segments.push(simple_segment(raw));
	}
	let end = segments.len() as i32;

	variables.push(Variable {
		field_path,
		start_segment: start,
		end_segment: end,
	});
	Ok(())
}

fn simple_segment(raw: &str) -> Segment {
	match raw {
		"*" => Segment::SingleWildcard,
		"**" => Segment::DoubleWildcard,
		_ => Segment::Literal(raw.into()),
	}
}

fn validate_literal_chars(raw: &str) -> Result<(), Error> {
	if raw == "*" || raw == "**" {
		return Ok(());
	}
	for c in raw.chars() {
		if matches!(c, '/' | '{' | '}' | ':' | '?' | '#') {
			return Err(Error::InvalidLiteralChar(c));
		}
	}
	Ok(())
}

fn validate_double_wildcard(segments: &[Segment]) -> Result<(), Error> {
	let count = segments
		.iter()
		.filter(|s| **s == Segment::DoubleWildcard)
		.count();
	if count > 1 {
		return Err(Error::MultipleDoubleWildcards);
	}
	if count == 1 {
		let pos = segments
			.iter()
			.position(|s| *s == Segment::DoubleWildcard)
			.expect("count == 1");
		if segments[pos + 1..]
			.iter()
			.any(|s| !matches!(s, Segment::Literal(_)))
		{
			return Err(Error::DoubleWildcardNotInTail);
		}
	}
	Ok(())
}

/// After validating there's at most one `**`, encode the containing
/// variable's `end_segment` as a negative tail-relative offset.
fn resolve_unbounded_ends(segments: &[Segment], variables: &mut [Variable]) {
	let total = segments.len() as i32;
	for v in variables.iter_mut() {
		let contains_dw = segments[v.start_segment as usize..v.end_segment as usize]
			.iter()
			.any(|s| *s == Segment::DoubleWildcard);
		if contains_dw {
			let tail_len = total - v.end_segment;
			v.end_segment = -(tail_len + 1);
		}
	}
}

impl fmt::Display for Segment {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Segment::Literal(s) => write!(f, "{s}"),
			Segment::SingleWildcard => write!(f, "*"),
			Segment::DoubleWildcard => write!(f, "**"),
		}
	}
}
