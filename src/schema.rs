//! Schemas and structural type checking.
//!
//! A [`Schema`] is an ordered mapping from field name to [`TypeSpec`]. It is
//! used twice per layer: once to reject malformed caller input, and once to
//! decide whether a model's JSON reply is acceptable.
//!
//! Type specs render in a Python-style notation (`list[dict[str, int]]`)
//! that is shown to the model as part of the output contract, and the same
//! notation parses back via [`FromStr`], so schemas can be loaded from JSON:
//!
//! ```
//! use lmflow::schema::{Schema, TypeSpec};
//!
//! let schema: Schema = serde_json::from_str(r#"{"answer": "int", "steps": "list[str]"}"#).unwrap();
//! assert_eq!(schema.get("steps"), Some(&TypeSpec::list(TypeSpec::Str)));
//! assert_eq!(schema.describe(), r#"{"answer":"int","steps":"list[str]"}"#);
//! ```

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Validation failures reported by [`Schema::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// A supplied key is not declared by the schema.
    #[error("{0} is not a valid key")]
    UnknownKey(String),

    /// A value does not satisfy its declared type.
    #[error("the type of {key} does not match the specification, it should match {expected} but got {actual}")]
    TypeMismatch {
        /// Offending field.
        key: String,
        /// Rendered expected type, e.g. `list[int]`.
        expected: String,
        /// Compact JSON of the offending value.
        actual: String,
    },

    /// One or more declared keys were not supplied.
    #[error("missing the following keys: {0:?}")]
    MissingKeys(Vec<String>),
}

/// Failure to parse a type spec from its display notation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid type spec '{input}': {reason}")]
pub struct TypeParseError {
    input: String,
    reason: String,
}

/// A structural type over JSON values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSpec {
    Str,
    /// Integral JSON numbers. Booleans also count, as `bool` is an `int`
    /// subtype in the notation this mirrors.
    Int,
    /// Any JSON number, integral or not, or a boolean.
    Float,
    Bool,
    /// JSON `null`.
    Null,
    Any,
    /// Ordered collection with a uniform element type.
    List(Box<TypeSpec>),
    /// Object with typed keys and values. Keys are JSON strings, so the key
    /// type must accept strings (`str`, `Any`, or a union containing one).
    Dict(Box<TypeSpec>, Box<TypeSpec>),
    /// Fixed-arity ordered collection with per-position types.
    Tuple(Vec<TypeSpec>),
    /// Satisfied by a value matching any member.
    Union(Vec<TypeSpec>),
}

impl TypeSpec {
    pub fn list(item: TypeSpec) -> Self {
        TypeSpec::List(Box::new(item))
    }

    pub fn dict(key: TypeSpec, value: TypeSpec) -> Self {
        TypeSpec::Dict(Box::new(key), Box::new(value))
    }

    /// `Union[inner, NoneType]`.
    pub fn optional(inner: TypeSpec) -> Self {
        TypeSpec::Union(vec![inner, TypeSpec::Null])
    }

    /// Structural, recursive type check.
    pub fn satisfies(&self, value: &Value) -> bool {
        match self {
            TypeSpec::Str => value.is_string(),
            TypeSpec::Int => value.is_i64() || value.is_u64() || value.is_boolean(),
            TypeSpec::Float => value.is_number() || value.is_boolean(),
            TypeSpec::Bool => value.is_boolean(),
            TypeSpec::Null => value.is_null(),
            TypeSpec::Any => true,
            TypeSpec::List(item) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|v| item.satisfies(v))),
            TypeSpec::Dict(key, val) => value.as_object().is_some_and(|map| {
                map.iter()
                    .all(|(k, v)| key.accepts_key(k) && val.satisfies(v))
            }),
            TypeSpec::Tuple(items) => value.as_array().is_some_and(|values| {
                values.len() == items.len()
                    && items.iter().zip(values).all(|(t, v)| t.satisfies(v))
            }),
            TypeSpec::Union(options) => options.iter().any(|t| t.satisfies(value)),
        }
    }

    fn accepts_key(&self, key: &str) -> bool {
        match self {
            TypeSpec::Str | TypeSpec::Any => true,
            TypeSpec::Union(options) => options.iter().any(|t| t.accepts_key(key)),
            _ => false,
        }
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn args(f: &mut fmt::Formatter<'_>, outer: &str, inner: &[&TypeSpec]) -> fmt::Result {
            write!(f, "{}[", outer)?;
            for (i, t) in inner.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", t)?;
            }
            f.write_str("]")
        }

        match self {
            TypeSpec::Str => f.write_str("str"),
            TypeSpec::Int => f.write_str("int"),
            TypeSpec::Float => f.write_str("float"),
            TypeSpec::Bool => f.write_str("bool"),
            TypeSpec::Null => f.write_str("NoneType"),
            TypeSpec::Any => f.write_str("Any"),
            TypeSpec::List(item) => args(f, "list", &[item.as_ref()]),
            TypeSpec::Dict(k, v) => args(f, "dict", &[k.as_ref(), v.as_ref()]),
            TypeSpec::Tuple(items) => args(f, "tuple", &items.iter().collect::<Vec<_>>()),
            TypeSpec::Union(options) => args(f, "Union", &options.iter().collect::<Vec<_>>()),
        }
    }
}

/// Recursive-descent parser over the display notation.
struct TypeParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> TypeParser<'a> {
    fn fail<T>(&self, reason: impl Into<String>) -> Result<T, TypeParseError> {
        Err(TypeParseError {
            input: self.input.to_string(),
            reason: reason.into(),
        })
    }

    fn skip_ws(&mut self) {
        let rest = &self.input[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn eat(&mut self, ch: char) -> bool {
        self.skip_ws();
        if self.input[self.pos..].starts_with(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> &'a str {
        self.skip_ws();
        let input = self.input;
        let rest = &input[self.pos..];
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn args(&mut self) -> Result<Vec<TypeSpec>, TypeParseError> {
        let mut out = Vec::new();
        if !self.eat('[') {
            return Ok(out);
        }
        if self.eat(']') {
            return Ok(out);
        }
        loop {
            out.push(self.parse_type()?);
            if self.eat(']') {
                return Ok(out);
            }
            if !self.eat(',') {
                return self.fail(format!("expected ',' or ']' at offset {}", self.pos));
            }
        }
    }

    fn parse_type(&mut self) -> Result<TypeSpec, TypeParseError> {
        let name = self.ident();
        let name = name.strip_prefix("typing.").unwrap_or(name);
        let mut args = self.args()?;
        let arity = args.len();
        let spec = match (name, arity) {
            ("str", 0) => TypeSpec::Str,
            ("int", 0) => TypeSpec::Int,
            ("float", 0) => TypeSpec::Float,
            ("bool", 0) => TypeSpec::Bool,
            ("NoneType" | "None" | "null", 0) => TypeSpec::Null,
            ("Any", 0) => TypeSpec::Any,
            ("list" | "List", 1) => TypeSpec::list(args.remove(0)),
            ("dict" | "Dict", 2) => {
                let value = args.remove(1);
                TypeSpec::dict(args.remove(0), value)
            }
            ("tuple" | "Tuple", _) => TypeSpec::Tuple(args),
            ("Union", n) if n > 0 => TypeSpec::Union(args),
            ("Optional", 1) => TypeSpec::optional(args.remove(0)),
            ("", _) => return self.fail(format!("expected a type name at offset {}", self.pos)),
            (other, n) => return self.fail(format!("unknown type '{}' with {} argument(s)", other, n)),
        };
        Ok(spec)
    }
}

impl FromStr for TypeSpec {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = TypeParser { input: s, pos: 0 };
        let spec = parser.parse_type()?;
        parser.skip_ws();
        if parser.pos != s.len() {
            return parser.fail(format!("trailing input at offset {}", parser.pos));
        }
        Ok(spec)
    }
}

impl Serialize for TypeSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TypeSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Ordered mapping from field name to [`TypeSpec`].
///
/// Keys are unique: declaring a field twice replaces its type in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<(String, TypeSpec)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field (builder style).
    pub fn field(mut self, name: impl Into<String>, spec: TypeSpec) -> Self {
        self.insert(name.into(), spec);
        self
    }

    fn insert(&mut self, name: String, spec: TypeSpec) {
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = spec,
            None => self.fields.push((name, spec)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&TypeSpec> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, t)| t)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypeSpec)> {
        self.fields.iter().map(|(k, t)| (k.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check `values` against this schema.
    ///
    /// Keys are checked in the iteration order of `values`; the first unknown
    /// key or type mismatch is returned immediately. Only when every present
    /// key passes are absent schema keys reported, all at once, in schema
    /// order.
    pub fn validate(&self, values: &Map<String, Value>) -> Result<(), SchemaError> {
        for (key, value) in values {
            let spec = self
                .get(key)
                .ok_or_else(|| SchemaError::UnknownKey(key.clone()))?;
            if !spec.satisfies(value) {
                return Err(SchemaError::TypeMismatch {
                    key: key.clone(),
                    expected: spec.to_string(),
                    actual: value.to_string(),
                });
            }
        }

        let missing: Vec<String> = self
            .keys()
            .filter(|k| !values.contains_key(*k))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(SchemaError::MissingKeys(missing));
        }
        Ok(())
    }

    /// JSON rendering of the schema with each type shown in display notation,
    /// e.g. `{"answer":"int"}`. This is the contract embedded in system prompts.
    pub fn describe(&self) -> String {
        let map: Map<String, Value> = self
            .iter()
            .map(|(k, t)| (k.to_string(), Value::String(t.to_string())))
            .collect();
        Value::Object(map).to_string()
    }
}

impl<K: Into<String>> FromIterator<(K, TypeSpec)> for Schema {
    fn from_iter<I: IntoIterator<Item = (K, TypeSpec)>>(iter: I) -> Self {
        let mut schema = Schema::new();
        for (k, t) in iter {
            schema.insert(k.into(), t);
        }
        schema
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, t) in &self.fields {
            map.serialize_entry(k, t)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SchemaVisitor;

        impl<'de> Visitor<'de> for SchemaVisitor {
            type Value = Schema;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field names to type specs")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Schema, A::Error> {
                let mut schema = Schema::new();
                while let Some((name, spec)) = access.next_entry::<String, TypeSpec>()? {
                    if schema.contains(&name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate schema key '{}'",
                            name
                        )));
                    }
                    schema.insert(name, spec);
                }
                Ok(schema)
            }
        }

        deserializer.deserialize_map(SchemaVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected an object"),
        }
    }

    fn person() -> Schema {
        Schema::new()
            .field("name", TypeSpec::Str)
            .field("age", TypeSpec::Int)
    }

    #[test]
    fn conforming_values_pass() {
        assert!(person().validate(&obj(json!({"name": "Ann", "age": 5}))).is_ok());
    }

    #[test]
    fn unknown_key_reported() {
        let err = person()
            .validate(&obj(json!({"name": "Ann", "age": 5, "pet": "cat"})))
            .unwrap_err();
        assert_eq!(err, SchemaError::UnknownKey("pet".into()));
    }

    #[test]
    fn missing_keys_listed_in_schema_order() {
        let schema = person().field("city", TypeSpec::Str);
        let err = schema.validate(&obj(json!({"age": 5}))).unwrap_err();
        assert_eq!(err, SchemaError::MissingKeys(vec!["name".into(), "city".into()]));
    }

    #[test]
    fn type_error_wins_over_missing_keys() {
        let err = person().validate(&obj(json!({"age": "five"}))).unwrap_err();
        match err {
            SchemaError::TypeMismatch { key, expected, actual } => {
                assert_eq!(key, "age");
                assert_eq!(expected, "int");
                assert_eq!(actual, "\"five\"");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn first_offender_in_value_order_short_circuits() {
        let err = person()
            .validate(&obj(json!({"zzz": 1, "age": "five"})))
            .unwrap_err();
        assert_eq!(err, SchemaError::UnknownKey("zzz".into()));
    }

    #[test]
    fn numeric_tower_bool_int_float() {
        assert!(TypeSpec::Int.satisfies(&json!(true)));
        assert!(TypeSpec::Int.satisfies(&json!(false)));
        assert!(!TypeSpec::Int.satisfies(&json!(5.5)));
        assert!(TypeSpec::Float.satisfies(&json!(true)));
        assert!(TypeSpec::Float.satisfies(&json!(5)));
        assert!(TypeSpec::Float.satisfies(&json!(5.5)));
        assert!(!TypeSpec::Bool.satisfies(&json!(1)));
    }

    #[test]
    fn bool_passes_int_field() {
        let schema = Schema::new().field("count", TypeSpec::Int).field("ratio", TypeSpec::Float);
        assert!(schema.validate(&obj(json!({"count": true, "ratio": false}))).is_ok());
    }

    #[test]
    fn nested_containers_checked_recursively() {
        let spec = TypeSpec::list(TypeSpec::dict(TypeSpec::Str, TypeSpec::Int));
        assert!(spec.satisfies(&json!([{"a": 1}, {"b": 2, "c": 3}])));
        assert!(spec.satisfies(&json!([])));
        assert!(!spec.satisfies(&json!([{"a": 1}, {"b": "2"}])));
        assert!(!spec.satisfies(&json!({"a": 1})));
    }

    #[test]
    fn dict_keys_must_accept_strings() {
        let spec = TypeSpec::dict(TypeSpec::Int, TypeSpec::Int);
        assert!(!spec.satisfies(&json!({"1": 1})));
        assert!(spec.satisfies(&json!({})));
    }

    #[test]
    fn tuple_requires_exact_arity_and_positions() {
        let spec = TypeSpec::Tuple(vec![TypeSpec::Int, TypeSpec::Str]);
        assert!(spec.satisfies(&json!([1, "a"])));
        assert!(!spec.satisfies(&json!(["a", 1])));
        assert!(!spec.satisfies(&json!([1, "a", 2])));
        assert!(!spec.satisfies(&json!([1])));
    }

    #[test]
    fn union_and_optional() {
        let spec = TypeSpec::optional(TypeSpec::Int);
        assert!(spec.satisfies(&json!(null)));
        assert!(spec.satisfies(&json!(3)));
        assert!(!spec.satisfies(&json!("3")));
    }

    #[test]
    fn nested_field_mismatch_names_the_field() {
        let schema = Schema::new().field("scores", TypeSpec::list(TypeSpec::Int));
        let err = schema.validate(&obj(json!({"scores": [1, "two"]}))).unwrap_err();
        assert!(matches!(err, SchemaError::TypeMismatch { ref key, .. } if key == "scores"));
        assert!(err.to_string().contains("list[int]"));
    }

    #[test]
    fn renders_python_style_names() {
        let spec = TypeSpec::list(TypeSpec::dict(TypeSpec::Str, TypeSpec::Int));
        assert_eq!(spec.to_string(), "list[dict[str, int]]");
        assert_eq!(spec.to_string(), spec.clone().to_string());
        assert_eq!(
            TypeSpec::Tuple(vec![TypeSpec::Int, TypeSpec::Null]).to_string(),
            "tuple[int, NoneType]"
        );
        assert_eq!(TypeSpec::optional(TypeSpec::Str).to_string(), "Union[str, NoneType]");
    }

    #[test]
    fn parses_display_notation() {
        let spec: TypeSpec = "List[ Dict[str, int] ]".parse().unwrap();
        assert_eq!(spec, TypeSpec::list(TypeSpec::dict(TypeSpec::Str, TypeSpec::Int)));
        let spec: TypeSpec = "Optional[tuple[int, str]]".parse().unwrap();
        assert_eq!(
            spec,
            TypeSpec::optional(TypeSpec::Tuple(vec![TypeSpec::Int, TypeSpec::Str]))
        );
    }

    #[test]
    fn rejects_malformed_notation() {
        assert!("list[int".parse::<TypeSpec>().is_err());
        assert!("dict[str]".parse::<TypeSpec>().is_err());
        assert!("widget".parse::<TypeSpec>().is_err());
        assert!("int]".parse::<TypeSpec>().is_err());
        assert!("".parse::<TypeSpec>().is_err());
    }

    #[test]
    fn schema_deserializes_in_order_and_rejects_duplicates() {
        let schema: Schema =
            serde_json::from_str(r#"{"b": "int", "a": "list[str]"}"#).unwrap();
        assert_eq!(schema.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert!(serde_json::from_str::<Schema>(r#"{"a": "int", "a": "str"}"#).is_err());
        assert!(serde_json::from_str::<Schema>(r#"{"a": "widget"}"#).is_err());
    }

    #[test]
    fn redeclaring_a_field_replaces_it() {
        let schema = Schema::new()
            .field("a", TypeSpec::Int)
            .field("b", TypeSpec::Str)
            .field("a", TypeSpec::Float);
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.get("a"), Some(&TypeSpec::Float));
        assert_eq!(schema.describe(), r#"{"a":"float","b":"str"}"#);
    }

    fn arb_spec() -> impl Strategy<Value = TypeSpec> {
        let leaf = prop_oneof![
            Just(TypeSpec::Str),
            Just(TypeSpec::Int),
            Just(TypeSpec::Float),
            Just(TypeSpec::Bool),
            Just(TypeSpec::Null),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                inner.clone().prop_map(TypeSpec::list),
                inner.clone().prop_map(|v| TypeSpec::dict(TypeSpec::Str, v)),
                prop::collection::vec(inner, 1..4).prop_map(TypeSpec::Tuple),
            ]
        })
    }

    fn arb_value(spec: &TypeSpec) -> BoxedStrategy<Value> {
        match spec {
            TypeSpec::Str => "[a-z]{0,8}".prop_map(Value::from).boxed(),
            TypeSpec::Int => any::<i64>().prop_map(Value::from).boxed(),
            TypeSpec::Float => (-1.0e6f64..1.0e6).prop_map(Value::from).boxed(),
            TypeSpec::Bool => any::<bool>().prop_map(Value::from).boxed(),
            TypeSpec::Null | TypeSpec::Any => Just(Value::Null).boxed(),
            TypeSpec::List(item) => prop::collection::vec(arb_value(item), 0..4)
                .prop_map(Value::Array)
                .boxed(),
            TypeSpec::Dict(_, val) => prop::collection::vec(("[a-z]{1,6}", arb_value(val)), 0..4)
                .prop_map(|pairs| Value::Object(pairs.into_iter().collect()))
                .boxed(),
            TypeSpec::Tuple(items) => items
                .iter()
                .map(arb_value)
                .collect::<Vec<_>>()
                .prop_map(Value::Array)
                .boxed(),
            TypeSpec::Union(options) => arb_value(&options[0]),
        }
    }

    fn arb_conforming() -> impl Strategy<Value = (Schema, Map<String, Value>)> {
        prop::collection::vec(arb_spec(), 1..5).prop_flat_map(|specs| {
            let values: Vec<_> = specs.iter().map(arb_value).collect();
            (Just(specs), values).prop_map(|(specs, values)| {
                let schema: Schema = specs
                    .into_iter()
                    .enumerate()
                    .map(|(i, t)| (format!("f{}", i), t))
                    .collect();
                let map: Map<String, Value> = values
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (format!("f{}", i), v))
                    .collect();
                (schema, map)
            })
        })
    }

    proptest! {
        #[test]
        fn prop_conforming_values_validate((schema, values) in arb_conforming()) {
            prop_assert!(schema.validate(&values).is_ok());
        }

        #[test]
        fn prop_removed_key_is_reported_missing((schema, mut values) in arb_conforming(), pick in any::<prop::sample::Index>()) {
            let key = pick.get(&schema.keys().map(str::to_string).collect::<Vec<_>>()).clone();
            values.remove(&key);
            match schema.validate(&values) {
                Err(SchemaError::MissingKeys(keys)) => prop_assert!(keys.contains(&key)),
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }

        #[test]
        fn prop_extra_key_is_reported_unknown((schema, mut values) in arb_conforming()) {
            values.insert("not_in_schema".into(), Value::Null);
            prop_assert_eq!(
                schema.validate(&values),
                Err(SchemaError::UnknownKey("not_in_schema".into()))
            );
        }

        #[test]
        fn prop_rendering_round_trips(spec in arb_spec()) {
            let rendered = spec.to_string();
            prop_assert_eq!(rendered.parse::<TypeSpec>().unwrap(), spec);
        }
    }
}
