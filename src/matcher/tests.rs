use super::*;

fn build(templates: &[(&str, &str, &str)]) -> PathMatcher {
	let mut b = PathMatcher::builder();
	for (method, tmpl, id) in templates {
		assert!(
			b.register(method, tmpl, "", id.to_string()).unwrap(),
			"register {method} {tmpl}"
		);
	}
	b.build()
}

#[test]
fn simple_get_scenario() {
	// Scenario 1 from the spec's testable-properties section.
	let m = build(&[("GET", "/shelves/{shelf}/books/{book}", "op1")]);
	let got = m.lookup("GET", "/shelves/1/books/2").unwrap();
	assert_eq!(got.method_data.operation_id, "op1");
	assert_eq!(
		got.bindings,
		vec![
			VariableBinding {
				field_path: vec!["shelf".into()],
				value: "1".into()
			},
			VariableBinding {
				field_path: vec!["book".into()],
				value: "2".into()
			},
		]
	);
}

#[test]
fn custom_verb_with_double_wildcard_scenario() {
	// Scenario 2 from the spec.
	let m = build(&[("GET", "/v1/{name=**}:cancel", "op2")]);
	let got = m
		.lookup("GET", "/v1/projects/p1/operations/o1:cancel")
		.unwrap();
	assert_eq!(
		got.bindings,
		vec![VariableBinding {
			field_path: vec!["name".into()],
			value: "projects/p1/operations/o1".into(),
		}]
	);
}

#[test]
fn no_match_when_verb_absent() {
	let m = build(&[("GET", "/v1/{name=**}:cancel", "op2")]);
	assert!(m.lookup("GET", "/v1/projects/p1/operations/o1").is_none());
}

#[test]
fn longest_specific_wins() {
	let m = build(&[
		("GET", "/a/{x}", "generic"),
		("GET", "/a/fixed", "specific"),
	]);
	assert_eq!(
		m.lookup("GET", "/a/fixed").unwrap().method_data.operation_id,
		"specific"
	);
	assert_eq!(
		m.lookup("GET", "/a/other").unwrap().method_data.operation_id,
		"generic"
	);
}

#[test]
fn duplicate_registration_is_stable() {
	let mut b = PathMatcher::builder();
	assert!(b.register("GET", "/a/{x}", "", "one").unwrap());
	assert!(!b.register("GET", "/a/{x}", "", "two").unwrap());
	let m = b.build();
	assert_eq!(
		m.lookup("GET", "/a/1").unwrap().method_data.operation_id,
		"one"
	);
}

#[test]
fn wildcard_method_fallback() {
	let m = build(&[("*", "/a/{x}", "any")]);
	assert_eq!(
		m.lookup("POST", "/a/1").unwrap().method_data.operation_id,
		"any"
	);
}

#[test]
fn empty_middle_segment_does_not_match_double_wildcard() {
	let m = build(&[("GET", "/c/{n=**}/v/{w}", "op")]);
	assert!(m.lookup("GET", "/c//v/d/w/x").is_none());
}

#[test]
fn root_and_catch_all() {
	let m = build(&[("GET", "/", "root"), ("GET", "/**", "catch_all")]);
	assert_eq!(m.lookup("GET", "/").unwrap().method_data.operation_id, "root");
	assert_eq!(
		m.lookup("GET", "/anything/here")
			.unwrap()
			.method_data
			.operation_id,
		"catch_all"
	);
}

#[test]
fn path_longer_than_registered_template_does_not_match() {
	let m = build(&[("GET", "/a/b", "op")]);
	assert!(m.lookup("GET", "/a/b/c").is_none());
}

#[test]
fn percent_decoding_only_for_single_segment_bindings() {
	let m = build(&[("GET", "/a/{x}", "single"), ("GET", "/b/{y=**}", "multi")]);
	// `%2F` is a reserved octet (it would introduce an extra path
	// separator), so it must survive single-segment decoding verbatim;
	// only unreserved-octet escapes are unescaped.
	let got = m.lookup("GET", "/a/hello%2Fworld").unwrap();
	assert_eq!(got.bindings[0].value, "hello%2Fworld");
	assert!(!got.bindings[0].value.contains('/'));

	let got2 = m.lookup("GET", "/b/hello%2Fworld/more").unwrap();
	assert_eq!(got2.bindings[0].value, "hello%2Fworld/more");
}

#[test]
fn single_segment_decodes_only_unreserved_octets() {
	let m = build(&[("GET", "/a/{x}", "single")]);
	// `%41` ('A') is unreserved and is decoded; `%20` (space) and `%2F`
	// ('/') are not unreserved and stay escaped.
	let got = m.lookup("GET", "/a/p%20q%2Fr%41").unwrap();
	assert_eq!(got.bindings[0].value, "p%20q%2FrA");
}
