//! Property descriptors.
//!
//! A [`Property`] describes one logical column of an entity class: type,
//! nullability, default, key flags, indexes and optional converter. It is
//! built from a [`PropertyDef`], either written with the typed builder or
//! parsed from a compact definition string (`string size=128 unique`), and
//! validated once at model build time.

use crate::converter::Converter;
use crate::error::{BadTypeError, BrokenError, Error, Result};
use crate::types::{DataType, IntSize, TypeKeyword};
use crate::validate::is_identifier;
use crate::value::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use heck::ToSnakeCase;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

const SECONDS_PER_DAY: i64 = 86_400;

/// An index declaration on a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDecl {
    /// Index name, the column name when omitted
    pub name: Option<String>,
    pub unique: bool,
}

/// Unvalidated property declaration.
#[derive(Debug, Clone)]
pub struct PropertyDef {
    name: String,
    data_type: DataType,
    unsigned: bool,
    nullable: bool,
    default: Option<Value>,
    primary: bool,
    auto_increment: bool,
    column: Option<String>,
    indexes: Vec<IndexDecl>,
    converter: Option<String>,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            unsigned: false,
            nullable: false,
            default: None,
            primary: false,
            auto_increment: false,
            column: None,
            indexes: Vec::new(),
            converter: None,
        }
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Bool)
    }

    pub fn int(name: impl Into<String>, size: IntSize) -> Self {
        Self::new(name, DataType::Int(size))
    }

    pub fn decimal(name: impl Into<String>, precision: u8, scale: u8) -> Self {
        Self::new(name, DataType::Decimal { precision, scale })
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Float)
    }

    pub fn double(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Double)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Date)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, DataType::DateTime)
    }

    pub fn time(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Time)
    }

    pub fn string(name: impl Into<String>, size: u16) -> Self {
        Self::new(name, DataType::String(size))
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Text)
    }

    pub fn long_text(name: impl Into<String>) -> Self {
        Self::new(name, DataType::LongText)
    }

    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Add a non-unique index, named after the column when `name` is `None`.
    pub fn index(mut self, name: Option<&str>) -> Self {
        self.indexes.push(IndexDecl {
            name: name.map(str::to_string),
            unique: false,
        });
        self
    }

    /// Add a unique index, named after the column when `name` is `None`.
    pub fn unique(mut self, name: Option<&str>) -> Self {
        self.indexes.push(IndexDecl {
            name: name.map(str::to_string),
            unique: true,
        });
        self
    }

    pub fn convert(mut self, converter: impl Into<String>) -> Self {
        self.converter = Some(converter.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parse a definition string.
    ///
    /// Grammar: `type[|type...] attr[=value] ...`. The leading token lists
    /// type hints, the first known data type wins unless a bare type token or
    /// `type=` attribute follows. Recognized attributes are `size`,
    /// `unsigned`, `null`, `primary`, `auto_increment`, `column`,
    /// `index[=a,b]`, `unique[=a,b]` and `convert=<Name>`. Tokens starting
    /// with `@` are markers and ignored.
    pub fn parse(class: &str, name: &str, definition: &str, default: Value) -> Result<Self> {
        let what = format!("{}->{}", class, name);
        let mut tokens = definition.split_whitespace().peekable();

        let mut hints: Vec<&str> = Vec::new();
        if let Some(first) = tokens.peek() {
            if !first.contains('=') && !first.starts_with('@') {
                hints = first.split('|').collect();
                tokens.next();
            }
        }

        let mut attributes: Vec<(&str, Option<&str>)> = Vec::new();
        for token in tokens {
            if token.starts_with('@') {
                continue;
            }
            let (key, value) = match token.split_once('=') {
                Some((key, value)) => (key.trim(), Some(value.trim())),
                None => (token, None),
            };
            if value.is_none() && TypeKeyword::parse(key).is_some() {
                attributes.push(("type", Some(key)));
            } else {
                attributes.push((key, value));
            }
        }

        let attribute = |key: &str| {
            attributes
                .iter()
                .rev()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| *v)
        };

        let keyword = match attribute("type") {
            Some(Some(token)) => TypeKeyword::parse(token)
                .ok_or_else(|| Error::broken(&what, format!("unknown data type {}", token)))?,
            Some(None) => return Err(Error::broken(&what, "missing data type")),
            None => hints
                .iter()
                .find_map(|hint| TypeKeyword::parse(hint))
                .ok_or_else(|| Error::broken(&what, "missing data type"))?,
        };

        let size = attribute("size").flatten();
        if keyword.requires_size() && size.is_none() {
            return Err(Error::broken(
                &what,
                format!("{} type requires size", keyword.as_str()),
            ));
        }
        let data_type = match keyword {
            TypeKeyword::Bool => DataType::Bool,
            TypeKeyword::Int => {
                let size = size
                    .and_then(|s| s.parse::<u8>().ok())
                    .and_then(IntSize::from_bytes)
                    .ok_or_else(|| Error::broken(&what, "unknown int size"))?;
                DataType::Int(size)
            }
            TypeKeyword::Decimal => {
                let (precision, scale): (u8, u8) = size
                    .and_then(|s| s.split_once(','))
                    .and_then(|(p, s)| Some((p.trim().parse().ok()?, s.trim().parse().ok()?)))
                    .ok_or_else(|| Error::broken(&what, "decimal size expects precision,scale"))?;
                DataType::Decimal { precision, scale }
            }
            TypeKeyword::Float => DataType::Float,
            TypeKeyword::Double => DataType::Double,
            TypeKeyword::Date => DataType::Date,
            TypeKeyword::DateTime => DataType::DateTime,
            TypeKeyword::Time => DataType::Time,
            TypeKeyword::String => {
                let size = size
                    .and_then(|s| s.parse::<u16>().ok())
                    .ok_or_else(|| Error::broken(&what, "string size expects int within 1..255"))?;
                DataType::String(size)
            }
            TypeKeyword::Text => DataType::Text,
            TypeKeyword::LongText => DataType::LongText,
        };

        let mut def = PropertyDef::new(name, data_type);
        def.default = Some(default);

        for (key, value) in &attributes {
            match *key {
                "type" | "size" => {}
                "unsigned" => def.unsigned = flag(&what, key, *value)?,
                "null" => def.nullable = flag(&what, key, *value)?,
                "primary" => def.primary = flag(&what, key, *value)?,
                "auto_increment" => def.auto_increment = flag(&what, key, *value)?,
                "column" => {
                    let column =
                        value.ok_or_else(|| Error::broken(&what, "column needs a name"))?;
                    def.column = Some(column.to_string());
                }
                "index" | "unique" => {
                    let unique = *key == "unique";
                    match value {
                        None => def.indexes.push(IndexDecl { name: None, unique }),
                        Some(names) => {
                            for index in names.split(',') {
                                def.indexes.push(IndexDecl {
                                    name: Some(index.trim().to_string()),
                                    unique,
                                });
                            }
                        }
                    }
                }
                "convert" => {
                    let converter =
                        value.ok_or_else(|| Error::broken(&what, "convert needs a converter name"))?;
                    def.converter = Some(converter.to_string());
                }
                other => {
                    return Err(Error::broken(&what, format!("unknown attribute {}", other)));
                }
            }
        }

        Ok(def)
    }
}

fn flag(what: &str, key: &str, value: Option<&str>) -> Result<bool> {
    match value {
        None | Some("1" | "true" | "yes") => Ok(true),
        Some("0" | "false" | "no") => Ok(false),
        Some(other) => Err(Error::broken(
            what,
            format!("{} expects a boolean, got {}", key, other),
        )),
    }
}

/// Validated, immutable column descriptor.
#[derive(Debug, Clone)]
pub struct Property {
    class: String,
    name: String,
    data_type: DataType,
    unsigned: bool,
    nullable: bool,
    default: Value,
    primary: bool,
    auto_increment: bool,
    indexes: BTreeMap<String, bool>,
    converter: Option<Arc<dyn Converter>>,
    column: String,
    related_class: Option<String>,
    source: Option<String>,
}

impl Property {
    /// Validate a declaration for `class`.
    ///
    /// `resolve` maps converter names to converters; an unresolved name is
    /// `Broken`.
    pub fn build(
        class: &str,
        def: PropertyDef,
        resolve: &dyn Fn(&str) -> Option<Arc<dyn Converter>>,
    ) -> Result<Self> {
        let what = format!("{}->{}", class, def.name);

        match def.data_type {
            DataType::Decimal { precision, scale } => {
                if !(1..=65).contains(&precision) {
                    return Err(Error::broken(&what, "precision is expected to be within 1..65"));
                }
                if scale > 30 {
                    return Err(Error::broken(
                        &what,
                        "number of decimal places is expected to be within 0..30",
                    ));
                }
                if scale > precision {
                    return Err(Error::broken(
                        &what,
                        "number of decimal places cannot exceed precision",
                    ));
                }
            }
            DataType::String(size) if size == 0 || size > 255 => {
                return Err(Error::broken(&what, "string size expects int within 1..255"));
            }
            _ => {}
        }

        if def.unsigned && !def.data_type.is_signable() {
            return Err(Error::broken(&what, "cannot use unsigned on non-int"));
        }

        let default = match def.default {
            Some(value) => value,
            None if def.nullable => Value::Null,
            None => def.data_type.zero_value(),
        };
        if def.nullable && !default.is_null() {
            return Err(Error::broken(
                &what,
                "nullable property cannot have non-null default",
            ));
        }
        if !def.nullable && default.is_null() {
            return Err(Error::broken(
                &what,
                "non-nullable property cannot have null default",
            ));
        }

        if def.auto_increment && (!def.data_type.is_integer() || !def.primary) {
            return Err(Error::broken(
                &what,
                "cannot use auto increment on non-primary or non-int property",
            ));
        }

        let column = def.column.unwrap_or_else(|| def.name.clone());
        if !is_identifier(&column) {
            return Err(Error::broken(&what, "malformed column name"));
        }

        let mut indexes = BTreeMap::new();
        for decl in def.indexes {
            let index = decl.name.unwrap_or_else(|| column.clone());
            if !is_identifier(&index) {
                return Err(Error::broken(&what, "malformed index name"));
            }
            if let Some(previous) = indexes.insert(index, decl.unique) {
                if previous != decl.unique {
                    return Err(Error::broken(
                        &what,
                        "index cannot be unique and not unique at the same time",
                    ));
                }
            }
        }

        let converter = match def.converter {
            Some(name) => Some(resolve(&name).ok_or_else(|| {
                Error::broken(
                    &what,
                    format!("not a standard converter and {} has no {} converter", class, name),
                )
            })?),
            None => None,
        };

        Ok(Self {
            class: class.to_string(),
            name: def.name,
            data_type: def.data_type,
            unsigned: def.unsigned,
            nullable: def.nullable,
            default,
            primary: def.primary,
            auto_increment: def.auto_increment,
            indexes,
            converter,
            column,
            related_class: None,
            source: None,
        })
    }

    /// Parse and validate a definition string in one go.
    pub fn parse(
        class: &str,
        name: &str,
        definition: &str,
        default: Value,
        resolve: &dyn Fn(&str) -> Option<Arc<dyn Converter>>,
    ) -> Result<Self> {
        Self::build(class, PropertyDef::parse(class, name, definition, default)?, resolve)
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn unsigned(&self) -> bool {
        self.unsigned
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn default(&self) -> &Value {
        &self.default
    }

    pub fn primary(&self) -> bool {
        self.primary
    }

    pub fn auto_increment(&self) -> bool {
        self.auto_increment
    }

    /// Index name -> uniqueness.
    pub fn indexes(&self) -> &BTreeMap<String, bool> {
        &self.indexes
    }

    pub fn converter(&self) -> Option<&Arc<dyn Converter>> {
        self.converter.as_ref()
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Class whose primary key this relation column references.
    pub fn related_class(&self) -> Option<&str> {
        self.related_class.as_deref()
    }

    /// For relation columns, the referenced primary key property name.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn is_relation(&self) -> bool {
        self.related_class.is_some()
    }

    /// Derive the foreign-key column that references this primary key.
    ///
    /// Name and column get the snake-cased owning class as prefix
    /// (`User.id` becomes `user_id`); the result is nullable, without
    /// default, key flags or indexes.
    pub fn relation_property(&self) -> Property {
        let prefix = self.class.to_snake_case();
        Property {
            name: format!("{}_{}", prefix, self.name),
            column: format!("{}_{}", prefix, self.column),
            nullable: true,
            default: Value::Null,
            primary: false,
            auto_increment: false,
            indexes: BTreeMap::new(),
            related_class: Some(self.class.clone()),
            source: Some(self.name.clone()),
            ..self.clone()
        }
    }

    /// Turn a relation column into a junction-table key column.
    pub fn junction_property(&self, index: &str) -> Property {
        let mut indexes = BTreeMap::new();
        indexes.insert(index.to_string(), false);
        Property {
            nullable: false,
            default: Value::Null,
            primary: true,
            auto_increment: false,
            indexes,
            ..self.clone()
        }
    }

    /// Cast a stored value (usually text) into the entity representation.
    pub fn cast_from_storage(&self, raw: &Value) -> Result<Value> {
        if let Some(converter) = &self.converter {
            let decoded = match raw {
                Value::Text(s) | Value::Decimal(s) => converter.decode(s)?,
                other => other.clone(),
            };
            return self.check_null(decoded);
        }

        if raw.is_null() {
            return self.check_null(Value::Null);
        }

        match self.data_type {
            DataType::Bool => match raw {
                Value::Text(s) => Ok(Value::Bool(s == "1")),
                other => other
                    .as_bool()
                    .map(Value::Bool)
                    .ok_or_else(|| self.mismatch("bool", other)),
            },
            DataType::Int(_) => raw
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| self.mismatch("int", raw)),
            DataType::Decimal { scale, .. } => self.decimal(raw, scale).map(Value::Decimal),
            DataType::Float | DataType::Double => raw
                .as_f64()
                .map(Value::Double)
                .ok_or_else(|| self.mismatch("floating point", raw)),
            DataType::Date | DataType::DateTime | DataType::Time => {
                let seconds = match raw {
                    Value::Timestamp(v) | Value::Int(v) => *v,
                    Value::Text(s) => self.parse_temporal(s)?,
                    other => return Err(self.mismatch("date/time", other)),
                };
                if self.data_type == DataType::Time {
                    Ok(Value::Timestamp(seconds.rem_euclid(SECONDS_PER_DAY)))
                } else {
                    Ok(Value::Timestamp(seconds))
                }
            }
            DataType::String(_) | DataType::Text | DataType::LongText => match raw {
                Value::Text(s) | Value::Decimal(s) => Ok(Value::Text(s.clone())),
                Value::Int(v) => Ok(Value::Text(v.to_string())),
                Value::Double(v) => Ok(Value::Text(v.to_string())),
                other => Err(self.mismatch("string", other)),
            },
        }
    }

    /// Cast an entity value into its stored string, `None` meaning NULL.
    pub fn cast_to_storage(&self, value: &Value) -> Result<Option<String>> {
        if value.is_null() {
            return self.check_null(Value::Null).map(|_| None);
        }

        if let Some(converter) = &self.converter {
            return converter.encode(value).map(Some);
        }

        let stored = match self.data_type {
            DataType::Bool => {
                let v = value
                    .as_bool()
                    .ok_or_else(|| self.mismatch("bool", value))?;
                if v { "1" } else { "0" }.to_string()
            }
            DataType::Int(_) => value
                .as_i64()
                .ok_or_else(|| self.mismatch("int", value))?
                .to_string(),
            DataType::Float | DataType::Double => value
                .as_f64()
                .ok_or_else(|| self.mismatch("floating point", value))?
                .to_string(),
            DataType::Decimal { scale, .. } => self.decimal(value, scale)?,
            DataType::Date | DataType::DateTime | DataType::Time => {
                let seconds = match value {
                    Value::Timestamp(v) | Value::Int(v) => *v,
                    Value::Text(s) => self.parse_temporal(s)?,
                    other => return Err(self.mismatch("date/time", other)),
                };
                let (seconds, format) = match self.data_type {
                    DataType::Date => (seconds, "%Y-%m-%d"),
                    DataType::DateTime => (seconds, "%Y-%m-%d %H:%M:%S"),
                    _ => (seconds.rem_euclid(SECONDS_PER_DAY), "%H:%M:%S"),
                };
                DateTime::from_timestamp(seconds, 0)
                    .ok_or_else(|| Error::broken(self.to_string(), "failed to format DateTime"))?
                    .format(format)
                    .to_string()
            }
            DataType::String(_) | DataType::Text | DataType::LongText => match value {
                Value::Text(s) | Value::Decimal(s) => s.clone(),
                Value::Int(v) => v.to_string(),
                Value::Double(v) => v.to_string(),
                Value::Bool(v) => if *v { "1" } else { "0" }.to_string(),
                other => return Err(self.mismatch("string", other)),
            },
        };
        Ok(Some(stored))
    }

    /// Stored rendering of the declared default, `None` when there is none.
    pub fn storage_default(&self) -> Result<Option<String>> {
        if self.auto_increment || self.default.is_null() {
            return Ok(None);
        }
        self.cast_to_storage(&self.default)
    }

    fn check_null(&self, value: Value) -> Result<Value> {
        if value.is_null() && !self.nullable {
            return Err(Error::broken(
                self.to_string(),
                "got null value but is not nullable",
            ));
        }
        Ok(value)
    }

    fn mismatch(&self, expected: &str, actual: &Value) -> Error {
        Error::BadType(BadTypeError {
            what: self.to_string(),
            expected: expected.to_string(),
            actual: Some(actual.type_name().to_string()),
        })
    }

    /// Fixed-point text with exactly `scale` decimals, never through `f64`.
    fn decimal(&self, value: &Value, scale: u8) -> Result<String> {
        let text = match value {
            Value::Text(s) | Value::Decimal(s) => s.trim().to_string(),
            Value::Int(v) => v.to_string(),
            Value::Double(v) if v.is_finite() => v.to_string(),
            other => return Err(self.mismatch("decimal", other)),
        };
        round_decimal(&text, usize::from(scale)).ok_or_else(|| self.mismatch("decimal", value))
    }

    fn parse_temporal(&self, text: &str) -> Result<i64> {
        parse_utc(text).ok_or_else(|| {
            Error::Broken(BrokenError {
                what: self.to_string(),
                reason: format!("failed to parse {:?} to DateTime", text),
                source: None,
            })
        })
    }
}

/// Parse a UTC calendar string into epoch seconds.
///
/// Accepts `Y-m-d H:i:s`, `Y-m-dTH:i:s`, `Y-m-d` and `H:i:s` (seconds since
/// midnight).
fn parse_utc(text: &str) -> Option<i64> {
    let text = text.trim();
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
            return Some(datetime.and_utc().timestamp());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date.and_time(NaiveTime::MIN).and_utc().timestamp());
    }
    NaiveTime::parse_from_str(text, "%H:%M:%S")
        .ok()
        .map(|time| i64::from(time.num_seconds_from_midnight()))
}

/// Round a plain decimal literal half away from zero to `scale` places.
///
/// `None` unless `text` is `[+-]digits[.digits]` with at least one digit.
fn round_decimal(text: &str, scale: usize) -> Option<String> {
    let (negative, unsigned) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if whole.len() + fraction.len() == 0 || !is_digits(whole) || !is_digits(fraction) {
        return None;
    }

    let mut digits: Vec<u8> = whole.bytes().collect();
    digits.extend(fraction.bytes().take(scale));
    digits.resize(whole.len() + scale, b'0');
    if fraction.as_bytes().get(scale).is_some_and(|d| *d >= b'5') {
        let mut carry = true;
        for digit in digits.iter_mut().rev() {
            if *digit == b'9' {
                *digit = b'0';
            } else {
                *digit += 1;
                carry = false;
                break;
            }
        }
        if carry {
            digits.insert(0, b'1');
        }
    }

    let split = digits.len() - scale;
    let (whole, fraction) = digits.split_at(split);
    let whole = match whole.iter().position(|d| *d != b'0') {
        Some(first) => &whole[first..],
        None => &b"0"[..],
    };
    let zero = whole == b"0" && fraction.iter().all(|d| *d == b'0');

    let mut out = String::with_capacity(whole.len() + scale + 2);
    if negative && !zero {
        out.push('-');
    }
    out.extend(whole.iter().map(|d| char::from(*d)));
    if scale > 0 {
        out.push('.');
        out.extend(fraction.iter().map(|d| char::from(*d)));
    }
    Some(out)
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.class, self.name)
    }
}
