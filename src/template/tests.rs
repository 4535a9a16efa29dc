use super::*;

#[test]
fn simple_literal_path() {
	let t = HttpTemplate::parse("/shelves/books").unwrap();
	assert_eq!(
		t.segments,
		vec![
			Segment::Literal("shelves".into()),
			Segment::Literal("books".into()),
		]
	);
	assert!(t.variables.is_empty());
	assert_eq!(t.verb, None);
}

#[test]
fn variable_with_default_binding() {
	let t = HttpTemplate::parse("/shelves/{shelf}/books/{book}").unwrap();
	assert_eq!(
		t.segments,
		vec![
			Segment::Literal("shelves".into()),
			Segment::SingleWildcard,
			Segment::Literal("books".into()),
			Segment::SingleWildcard,
		]
	);
	assert_eq!(t.variables.len(), 2);
	assert_eq!(t.variables[0].field_path, vec!["shelf".to_string()]);
	assert_eq!(t.variables[0].absolute_range(4), (1, 2));
	assert_eq!(t.variables[1].field_path, vec!["book".to_string()]);
	assert_eq!(t.variables[1].absolute_range(4), (3, 4));
}

#[test]
fn double_wildcard_variable_with_verb() {
	let t = HttpTemplate::parse("/v1/{name=**}:cancel").unwrap();
	assert_eq!(t.verb.as_deref(), Some("cancel"));
	assert_eq!(t.segments, vec![
		Segment::Literal("v1".into()),
		Segment::DoubleWildcard
	]);
	assert_eq!(t.variables.len(), 1);
	assert!(t.variables[0].is_unbounded());
	// against a concrete request of 4 segments: v1/projects/p1/operations
	assert_eq!(t.variables[0].absolute_range(4), (1, 4));
}

#[test]
fn double_wildcard_followed_by_literal_tail() {
	let t = HttpTemplate::parse("/v1/{name=**}/constant").unwrap();
	assert_eq!(t.segments, vec![
		Segment::Literal("v1".into()),
		Segment::DoubleWildcard,
		Segment::Literal("constant".into()),
	]);
	assert!(t.variables[0].is_unbounded());
	// request: v1/a/b/c/constant -> 5 segments, tail_len=1
	assert_eq!(t.variables[0].absolute_range(5), (1, 4));
}

#[test]
fn nested_variable_body() {
	let t = HttpTemplate::parse("/shelves/{shelf=shelves/*}").unwrap();
	assert_eq!(t.segments, vec![
		Segment::Literal("shelves".into()),
		Segment::Literal("shelves".into()),
		Segment::SingleWildcard,
	]);
	assert_eq!(t.variables[0].absolute_range(3), (1, 3));
}

#[test]
fn field_path_with_dots() {
	let t = HttpTemplate::parse("/x/{a.b.c}").unwrap();
	assert_eq!(t.variables[0].field_path, vec!["a", "b", "c"]);
}

#[test]
fn missing_leading_slash_fails() {
	assert_eq!(HttpTemplate::parse("shelves/1"), Err(Error::MissingLeadingSlash));
}

#[test]
fn unbalanced_braces_fail() {
	assert_eq!(
		HttpTemplate::parse("/shelves/{shelf"),
		Err(Error::UnbalancedBraces)
	);
	assert_eq!(
		HttpTemplate::parse("/shelves/shelf}"),
		Err(Error::UnbalancedBraces)
	);
}

#[test]
fn nested_variable_fails() {
	assert_eq!(
		HttpTemplate::parse("/shelves/{shelf={book}}"),
		Err(Error::NestedVariable)
	);
}

#[test]
fn multiple_double_wildcards_fail() {
	assert_eq!(
		HttpTemplate::parse("/a/**/b/**"),
		Err(Error::MultipleDoubleWildcards)
	);
}

#[test]
fn double_wildcard_not_in_tail_fails() {
	assert_eq!(
		HttpTemplate::parse("/a/**/{book}"),
		Err(Error::DoubleWildcardNotInTail)
	);
}

#[test]
fn empty_verb_fails() {
	assert_eq!(HttpTemplate::parse("/a/b:"), Err(Error::EmptyVerb));
}

#[test]
fn root_template() {
	let t = HttpTemplate::parse("/").unwrap();
	assert!(t.segments.is_empty());
}

#[test]
fn root_double_wildcard() {
	let t = HttpTemplate::parse("/**").unwrap();
	assert_eq!(t.segments, vec![Segment::DoubleWildcard]);
}
