//! Config-loading and serde helpers shared by `config.rs`.
//!
//! Copied near-verbatim from the teacher's `src/serdes.rs`, trimmed of
//! the remote-fetch (`FileInlineOrRemote`) and schema-macro machinery
//! this core's config surface doesn't use (no hot-reload, no CEL, no
//! generated JSON schema by default).

use std::fmt::{Debug, Display};
use std::path::PathBuf;
use std::{fs, io};

use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Serde-yaml represents things differently than "JSON in YAML format".
/// We don't want this. Instead, transcode YAML via the JSON model so
/// YAML anchors/aliases still produce plain JSON-shaped values.
pub mod yamlviajson {
	use serde::{de, ser};

	pub fn from_str<T>(s: &str) -> anyhow::Result<T>
	where
		T: for<'de> de::Deserialize<'de>,
	{
		let de_yaml = serde_yaml::Deserializer::from_str(s);
		let mut buf = Vec::with_capacity(128);
		{
			let mut se_json = serde_json::Serializer::new(&mut buf);
			serde_transcode::transcode(de_yaml, &mut se_json)?;
		} // se_json dropped here, releasing the mutable borrow on buf
		let de_json = &mut serde_json::Deserializer::from_slice(&buf);
		Ok(serde_path_to_error::deserialize(de_json)?)
	}

	pub fn to_string<T>(value: &T) -> anyhow::Result<String>
	where
		T: ?Sized + ser::Serialize,
	{
		let js = serde_json::to_string(value)?;
		let mut buf = Vec::with_capacity(128);
		let mut se_yaml = serde_yaml::Serializer::new(&mut buf);
		let de_serde = serde_yaml::Deserializer::from_str(&js);
		serde_transcode::transcode(de_serde, &mut se_yaml)?;
		Ok(String::from_utf8(buf)?)
	}
}

pub fn is_default<T: Default + PartialEq>(t: &T) -> bool {
	*t == Default::default()
}

/// Durations deserialize from human strings (`"1s"`, `"500ms"`) via
/// `duration-str`, and serialize back the same way.
pub mod serde_dur {
	use duration_str::HumanFormat;
	pub use duration_str::deserialize_duration as deserialize;
	use serde::Serializer;

	pub fn serialize<S: Serializer, T: HumanFormat>(t: &T, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&t.human_format())
	}
}

pub mod serde_dur_option {
	use duration_str::HumanFormat;
	pub use duration_str::deserialize_option_duration as deserialize;
	use serde::Serializer;

	pub fn serialize<S: Serializer, T: HumanFormat>(
		t: &Option<T>,
		serializer: S,
	) -> Result<S::Ok, S::Error> {
		match t {
			None => serializer.serialize_none(),
			Some(t) => serializer.serialize_str(&t.human_format()),
		}
	}
}

pub fn ser_display_option<S: Serializer, T: Display>(
	t: &Option<T>,
	serializer: S,
) -> Result<S::Ok, S::Error> {
	match t {
		None => serializer.serialize_none(),
		Some(t) => serializer.serialize_str(&t.to_string()),
	}
}

pub fn ser_display_iter<S: Serializer, T, TI: Display>(
	t: &T,
	serializer: S,
) -> Result<S::Ok, S::Error>
where
	for<'a> &'a T: IntoIterator<Item = &'a TI>,
{
	let mut seq = serializer.serialize_seq(None)?;
	for el in t {
		seq.serialize_element(&el.to_string())?;
	}
	seq.end()
}

pub fn ser_display<S: Serializer, T: Display>(t: &T, serializer: S) -> Result<S::Ok, S::Error> {
	serializer.serialize_str(&t.to_string())
}

pub fn ser_debug<S: Serializer, T: Debug>(t: &T, serializer: S) -> Result<S::Ok, S::Error> {
	serializer.serialize_str(&format!("{t:?}"))
}

/// Used on secret-bearing config fields so `Debug`/serialize never leaks
/// the value, matching the teacher's redaction convention.
pub fn ser_redact<S: Serializer, T>(_t: &T, serializer: S) -> Result<S::Ok, S::Error> {
	serializer.serialize_str("<redacted>")
}

pub fn de_parse<'de: 'a, 'a, D, T>(deserializer: D) -> Result<T, D::Error>
where
	D: Deserializer<'de>,
	T: TryFrom<&'a str>,
	<T as TryFrom<&'a str>>::Error: Display,
{
	let s: &'a str = <&str>::deserialize(deserializer)?;
	match T::try_from(s) {
		Ok(t) => Ok(t),
		Err(e) => Err(serde::de::Error::custom(e)),
	}
}

pub fn de_parse_option<'de: 'a, 'a, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
	D: Deserializer<'de>,
	T: TryFrom<&'a str>,
	<T as TryFrom<&'a str>>::Error: Display,
{
	let s: Option<&'a str> = Option::deserialize(deserializer)?;
	let Some(s) = s else { return Ok(None) };
	match T::try_from(s) {
		Ok(t) => Ok(Some(t)),
		Err(e) => Err(serde::de::Error::custom(e)),
	}
}

pub fn deser_key_from_file<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
	D: Deserializer<'de>,
{
	let input = FileOrInline::deserialize(deserializer)?;
	let k = input
		.load()
		.map_err(|e| serde::de::Error::custom(e.to_string()))?;
	Ok(SecretString::from(k.trim().to_string()))
}

pub fn de_as<'de, I, O, D>(deserializer: D) -> Result<O, D::Error>
where
	D: Deserializer<'de>,
	I: DeserializeOwned,
	O: TryFrom<I>,
	<O as TryFrom<I>>::Error: Display,
{
	let s: I = I::deserialize(deserializer)?;
	O::try_from(s).map_err(serde::de::Error::custom)
}

pub fn de_as_opt<'de, I, O, D>(deserializer: D) -> Result<Option<O>, D::Error>
where
	D: Deserializer<'de>,
	I: DeserializeOwned,
	O: TryFrom<I>,
	<O as TryFrom<I>>::Error: Display,
{
	let s: Option<I> = <Option<I>>::deserialize(deserializer)?;
	match s {
		Some(i) => Ok(Some(O::try_from(i).map_err(serde::de::Error::custom)?)),
		None => Ok(None),
	}
}

/// A config value that's either inlined directly or loaded from a file
/// path, used for service-account key material (§6: secret-bearing
/// fields held in `secrecy::SecretString`).
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub enum FileOrInline {
	File { file: PathBuf },
	Inline(String),
}

impl FileOrInline {
	pub fn load(&self) -> io::Result<String> {
		match self {
			FileOrInline::File { file } => fs_err::read_to_string(file),
			FileOrInline::Inline(s) => Ok(s.clone()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn yaml_anchors_resolve_like_json() {
		let yaml = "a: &x 1\nb: *x\n";
		#[derive(serde::Deserialize)]
		struct S {
			a: i64,
			b: i64,
		}
		let s: S = yamlviajson::from_str(yaml).unwrap();
		assert_eq!(s.a, 1);
		assert_eq!(s.b, 1);
	}

	#[test]
	fn bad_field_reports_path() {
		#[derive(serde::Deserialize)]
		struct S {
			#[allow(dead_code)]
			a: i64,
		}
		let err = yamlviajson::from_str::<S>("a: not_a_number\n").unwrap_err();
		assert!(err.to_string().contains('a'));
	}
}
