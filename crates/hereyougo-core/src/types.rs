//! Declared column data types.

use crate::value::Value;

/// Storage width of an integer column, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntSize {
    Int8,
    Int16,
    Int24,
    Int32,
    Int64,
}

impl IntSize {
    /// Parse a byte width (1, 2, 3, 4 or 8).
    pub fn from_bytes(bytes: u8) -> Option<Self> {
        match bytes {
            1 => Some(IntSize::Int8),
            2 => Some(IntSize::Int16),
            3 => Some(IntSize::Int24),
            4 => Some(IntSize::Int32),
            8 => Some(IntSize::Int64),
            _ => None,
        }
    }

    pub const fn bytes(self) -> u8 {
        match self {
            IntSize::Int8 => 1,
            IntSize::Int16 => 2,
            IntSize::Int24 => 3,
            IntSize::Int32 => 4,
            IntSize::Int64 => 8,
        }
    }
}

/// The data type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Int(IntSize),
    /// Fixed point with `precision` total digits, `scale` of them decimals
    Decimal { precision: u8, scale: u8 },
    Float,
    Double,
    Date,
    DateTime,
    /// Time of day
    Time,
    /// Bounded string, size in characters (1..=255)
    String(u16),
    Text,
    LongText,
}

/// Type keyword without its size, as written in definition strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKeyword {
    Bool,
    Int,
    Decimal,
    Float,
    Double,
    Date,
    DateTime,
    Time,
    String,
    Text,
    LongText,
}

impl TypeKeyword {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "bool" | "boolean" => Some(TypeKeyword::Bool),
            "int" | "integer" => Some(TypeKeyword::Int),
            "decimal" => Some(TypeKeyword::Decimal),
            "float" => Some(TypeKeyword::Float),
            "double" => Some(TypeKeyword::Double),
            "date" => Some(TypeKeyword::Date),
            "date_time" | "datetime" => Some(TypeKeyword::DateTime),
            "time" => Some(TypeKeyword::Time),
            "string" => Some(TypeKeyword::String),
            "text" => Some(TypeKeyword::Text),
            "long_text" => Some(TypeKeyword::LongText),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            TypeKeyword::Bool => "bool",
            TypeKeyword::Int => "int",
            TypeKeyword::Decimal => "decimal",
            TypeKeyword::Float => "float",
            TypeKeyword::Double => "double",
            TypeKeyword::Date => "date",
            TypeKeyword::DateTime => "date_time",
            TypeKeyword::Time => "time",
            TypeKeyword::String => "string",
            TypeKeyword::Text => "text",
            TypeKeyword::LongText => "long_text",
        }
    }

    /// Whether the type needs a `size` attribute.
    pub const fn requires_size(self) -> bool {
        matches!(
            self,
            TypeKeyword::Int | TypeKeyword::Decimal | TypeKeyword::String
        )
    }
}

impl DataType {
    pub const fn keyword(&self) -> TypeKeyword {
        match self {
            DataType::Bool => TypeKeyword::Bool,
            DataType::Int(_) => TypeKeyword::Int,
            DataType::Decimal { .. } => TypeKeyword::Decimal,
            DataType::Float => TypeKeyword::Float,
            DataType::Double => TypeKeyword::Double,
            DataType::Date => TypeKeyword::Date,
            DataType::DateTime => TypeKeyword::DateTime,
            DataType::Time => TypeKeyword::Time,
            DataType::String(_) => TypeKeyword::String,
            DataType::Text => TypeKeyword::Text,
            DataType::LongText => TypeKeyword::LongText,
        }
    }

    pub const fn is_integer(&self) -> bool {
        matches!(self, DataType::Int(_))
    }

    /// Types that accept the `unsigned` attribute.
    pub const fn is_signable(&self) -> bool {
        matches!(self, DataType::Int(_) | DataType::Decimal { .. })
    }

    pub const fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::DateTime | DataType::Time)
    }

    pub const fn is_textual(&self) -> bool {
        matches!(
            self,
            DataType::String(_) | DataType::Text | DataType::LongText
        )
    }

    /// Value of a freshly allocated non-nullable field.
    pub fn zero_value(&self) -> Value {
        match self {
            DataType::Bool => Value::Bool(false),
            DataType::Int(_) => Value::Int(0),
            DataType::Decimal { scale, .. } => {
                Value::Decimal(format!("{:.*}", usize::from(*scale), 0.0))
            }
            DataType::Float | DataType::Double => Value::Double(0.0),
            DataType::Date | DataType::DateTime | DataType::Time => Value::Timestamp(0),
            DataType::String(_) | DataType::Text | DataType::LongText => {
                Value::Text(String::new())
            }
        }
    }
}
