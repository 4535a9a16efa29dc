//! Path rewriter (C3).
//!
//! Translates a matched downstream path into the backend-facing path,
//! preserving/augmenting the query string with extracted variable
//! bindings. Grounded on `original_source/src/envoy/http/path_rewrite/
//! config_parser_impl.cc` for the two-mode split and on the teacher's
//! `types::agent::PathMatch`/route-rewrite plumbing for the Rust shape.

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use crate::matcher::VariableBinding;
use crate::template::HttpTemplate;

#[derive(Debug, Clone)]
pub enum CompiledRouteConfig {
	PathPrefix(String),
	ConstantPath {
		path: String,
		url_template: Option<HttpTemplate>,
	},
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
	#[error("path must not contain '?' or '#'")]
	InvalidPath,
	#[error("request path did not match the configured url_template")]
	UrlTemplateMismatch,
}

impl CompiledRouteConfig {
	pub fn path_prefix(prefix: impl Into<String>) -> Self {
		Self::PathPrefix(prefix.into())
	}

	pub fn constant_path(path: &str, url_template: Option<&str>) -> Result<Self, Error> {
		let path = normalize_constant_path(path)?;
		let url_template = url_template
			.map(HttpTemplate::parse)
			.transpose()
			.map_err(|_| Error::InvalidPath)?;
		Ok(Self::ConstantPath { path, url_template })
	}
}

fn normalize_constant_path(path: &str) -> Result<String, Error> {
	if path.contains('?') || path.contains('#') {
		return Err(Error::InvalidPath);
	}
	if path == "/" {
		return Ok(path.to_string());
	}
	Ok(path.trim_end_matches('/').to_string())
}

/// The outcome of a rewrite: the new backend path (without query) plus
/// the query-string fragment (already `&`-joined, no leading `?`/`&`) to
/// append.
pub struct Rewritten {
	pub path: String,
	pub query: Option<String>,
}

impl CompiledRouteConfig {
	pub fn rewrite(
		&self,
		original_path: &str,
		original_query: Option<&str>,
		extracted_bindings: &[VariableBinding],
		snake_to_json: &HashMap<String, String>,
	) -> Result<Rewritten, Error> {
		match self {
			CompiledRouteConfig::PathPrefix(prefix) => Ok(Rewritten {
				path: format!("{prefix}{original_path}"),
				query: original_query.map(|q| q.to_string()),
			}),
			CompiledRouteConfig::ConstantPath { path, url_template } => {
				let bindings = if let Some(tmpl) = url_template {
					let matcher = {
						let mut b = crate::matcher::PathMatcher::builder();
						b.register("*", &template_to_string(tmpl), "", "").ok();
						b.build()
					};
					let m = matcher
						.lookup("*", original_path)
						.ok_or(Error::UrlTemplateMismatch)?;
					m.bindings
				} else {
					extracted_bindings.to_vec()
				};

				let mut parts = Vec::new();
				if let Some(q) = original_query {
					if !q.is_empty() {
						parts.push(q.to_string());
					}
				}
				if let Some(encoded) = encode_bindings(&bindings, snake_to_json) {
					parts.push(encoded);
				}
				let query = if parts.is_empty() {
					None
				} else {
					Some(parts.join("&"))
				};
				Ok(Rewritten {
					path: path.clone(),
					query,
				})
			},
		}
	}
}

/// Re-serialize a parsed template back to its canonical string form, used
/// only to reuse the matcher for `url_template` matching. Not a general
/// template printer: it reconstructs a template equivalent for matching
/// purposes (variable field paths default to `*`/`**` bodies), which is
/// sufficient since `rewrite` only needs the binding ranges, not a
/// byte-identical echo of the original source text.
fn template_to_string(tmpl: &HttpTemplate) -> String {
	let mut out = String::from("/");
	let mut var_iter = tmpl.variables.iter().peekable();
	let mut i = 0usize;
	let mut first = true;
	while i < tmpl.segments.len() {
		if !first {
			out.push('/');
		}
		first = false;
		if let Some(v) = var_iter.peek() {
			if v.start_segment as usize == i {
				let v = var_iter.next().unwrap();
				let (start, end) = (v.start_segment as usize, {
					if v.end_segment >= 0 {
						v.end_segment as usize
					} else {
						tmpl.segments.len()
					}
				});
				let body = tmpl.segments[start..end]
					.iter()
					.map(|s| s.to_string())
					.collect::<Vec<_>>()
					.join("/");
				out.push('{');
				out.push_str(&v.field_path.join("."));
				out.push('=');
				out.push_str(&body);
				out.push('}');
				i = end;
				continue;
			}
		}
		out.push_str(&tmpl.segments[i].to_string());
		i += 1;
	}
	if let Some(verb) = &tmpl.verb {
		out.push(':');
		out.push_str(verb);
	}
	out
}

/// Encode extracted bindings as a `&`-joined `k=v` query fragment. Each
/// component of a binding's dotted field path is re-cased to its JSON
/// name via `snake_to_json` independently (a `foo_bar.baz_qux` path
/// looks up `foo_bar` and `baz_qux` separately), matching
/// `variable_binding_utils.cc`'s per-component recasing. Values are
/// emitted raw, not percent-encoded, matching the original.
fn encode_bindings(
	bindings: &[VariableBinding],
	snake_to_json: &HashMap<String, String>,
) -> Option<String> {
	if bindings.is_empty() {
		return None;
	}
	let parts: Vec<String> = bindings
		.iter()
		.map(|b| {
			let key = b
				.field_path
				.iter()
				.map(|component| snake_to_json.get(component).cloned().unwrap_or_else(|| component.clone()))
				.collect::<Vec<_>>()
				.join(".");
			format!(
				"{}={}",
				percent_encoding::utf8_percent_encode(&key, percent_encoding::NON_ALPHANUMERIC),
				b.value,
			)
		})
		.collect();
	Some(parts.join("&"))
}
