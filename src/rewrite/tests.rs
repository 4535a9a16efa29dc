use std::collections::HashMap;

use super::*;

#[test]
fn path_prefix_is_identity_when_empty() {
	let r = CompiledRouteConfig::path_prefix("");
	let out = r.rewrite("/foo/bar", Some("a=1"), &[], &HashMap::new()).unwrap();
	assert_eq!(out.path, "/foo/bar");
	assert_eq!(out.query.as_deref(), Some("a=1"));
}

#[test]
fn path_prefix_is_identity_for_root() {
	let r = CompiledRouteConfig::path_prefix("/");
	let out = r.rewrite("/foo", None, &[], &HashMap::new()).unwrap();
	assert_eq!(out.path, "//foo");
}

#[test]
fn path_prefix_prepends() {
	let r = CompiledRouteConfig::path_prefix("/api/v1");
	let out = r.rewrite("/foo/bar", None, &[], &HashMap::new()).unwrap();
	assert_eq!(out.path, "/api/v1/foo/bar");
}

#[test]
fn constant_path_with_url_template_scenario() {
	// Scenario 3 from the spec.
	let r = CompiledRouteConfig::constant_path("/foo", Some("/bar/{abc}")).unwrap();
	let out = r
		.rewrite("/bar/567", Some("xyz=123"), &[], &HashMap::new())
		.unwrap();
	assert_eq!(out.path, "/foo");
	assert_eq!(out.query.as_deref(), Some("xyz=123&abc=567"));
}

#[test]
fn constant_path_mismatch_fails() {
	let r = CompiledRouteConfig::constant_path("/foo", Some("/bar/{abc}")).unwrap();
	let err = r.rewrite("/other/567", None, &[], &HashMap::new()).unwrap_err();
	assert_eq!(err, Error::UrlTemplateMismatch);
}

#[test]
fn constant_path_without_template_uses_extracted_bindings() {
	let r = CompiledRouteConfig::constant_path("/foo", None).unwrap();
	let bindings = vec![VariableBinding {
		field_path: vec!["shelf_id".into()],
		value: "5".into(),
	}];
	let mut map = HashMap::new();
	map.insert("shelf_id".to_string(), "shelfId".to_string());
	let out = r.rewrite("/shelves/5", None, &bindings, &map).unwrap();
	assert_eq!(out.path, "/foo");
	assert_eq!(out.query.as_deref(), Some("shelfId=5"));
}

#[test]
fn unmapped_field_path_left_as_is() {
	let r = CompiledRouteConfig::constant_path("/foo", None).unwrap();
	let bindings = vec![VariableBinding {
		field_path: vec!["shelf_id".into()],
		value: "5".into(),
	}];
	let out = r
		.rewrite("/shelves/5", None, &bindings, &HashMap::new())
		.unwrap();
	assert_eq!(out.query.as_deref(), Some("shelf_id=5"));
}

#[test]
fn constant_path_trims_trailing_slash() {
	let r = CompiledRouteConfig::constant_path("/foo/", None).unwrap();
	match r {
		CompiledRouteConfig::ConstantPath { path, .. } => assert_eq!(path, "/foo"),
		_ => panic!("expected constant path"),
	}
}

#[test]
fn multi_component_field_path_recases_each_component() {
	let r = CompiledRouteConfig::constant_path("/foo", None).unwrap();
	let bindings = vec![VariableBinding {
		field_path: vec!["foo_bar".into(), "baz_qux".into()],
		value: "5".into(),
	}];
	let mut map = HashMap::new();
	map.insert("foo_bar".to_string(), "fooBar".to_string());
	map.insert("baz_qux".to_string(), "bazQux".to_string());
	let out = r.rewrite("/shelves/5", None, &bindings, &map).unwrap();
	assert_eq!(out.query.as_deref(), Some("fooBar.bazQux=5"));
}

#[test]
fn binding_value_is_emitted_raw_not_percent_encoded() {
	let r = CompiledRouteConfig::constant_path("/foo", None).unwrap();
	let bindings = vec![VariableBinding {
		field_path: vec!["name".into()],
		value: "projects/p1/operations/o1".into(),
	}];
	let out = r
		.rewrite("/shelves/5", None, &bindings, &HashMap::new())
		.unwrap();
	assert_eq!(out.query.as_deref(), Some("name=projects/p1/operations/o1"));
}

#[test]
fn rejects_path_with_query_or_fragment() {
	assert_eq!(
		CompiledRouteConfig::constant_path("/foo?x=1", None).unwrap_err(),
		Error::InvalidPath
	);
	assert_eq!(
		CompiledRouteConfig::constant_path("/foo#frag", None).unwrap_err(),
		Error::InvalidPath
	);
}
