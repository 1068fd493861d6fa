// recstream-core/src/signature.rs

//! Static output signatures and decoded values.
//!
//! Every dataset declares, before reading a byte, the shape and element
//! type of each field it will produce. Dimensions that are only known once
//! a source header has been read are declared [`Dim::Variable`].

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StreamError};

/// Element type of a decoded field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementType {
    UInt8,
    Int64,
    Utf8,
    Bytes,
    /// Named scalar members, in encoding order.
    Struct(Vec<FieldSignature>),
}

impl ElementType {
    /// A struct of scalar members.
    pub fn struct_of<N: Into<String>>(members: impl IntoIterator<Item = (N, ElementType)>) -> Self {
        ElementType::Struct(
            members
                .into_iter()
                .map(|(name, dtype)| FieldSignature::new(name, Shape::scalar(), dtype))
                .collect(),
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ElementType::UInt8 => "uint8",
            ElementType::Int64 => "int64",
            ElementType::Utf8 => "string",
            ElementType::Bytes => "bytes",
            ElementType::Struct(_) => "struct",
        }
    }

    /// Members of a struct type, or `None` for a primitive.
    pub fn members(&self) -> Option<&[FieldSignature]> {
        match self {
            ElementType::Struct(members) => Some(members),
            _ => None,
        }
    }

    /// Parses `struct<NAME: string, VAL: int64>`. Member names keep their case.
    fn parse_struct(s: &str, body: &str) -> Result<Self> {
        let mut members = Vec::new();
        for member in split_top_level(body) {
            let (name, dtype) = member.split_once(':').ok_or_else(|| {
                StreamError::config(format!("struct member '{member}' in '{s}' has no type"))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(StreamError::config(format!("unnamed struct member in '{s}'")));
            }
            members.push((name.to_string(), dtype.trim().parse::<ElementType>()?));
        }
        if members.is_empty() {
            return Err(StreamError::config(format!("struct '{s}' has no members")));
        }
        Ok(ElementType::struct_of(members))
    }
}

/// Splits on commas that are not nested inside `<...>`.
fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(body[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(body[start..].trim());
    parts.into_iter().filter(|part| !part.is_empty()).collect()
}

impl FromStr for ElementType {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("struct<") && lower.ends_with('>') {
            return Self::parse_struct(s, &trimmed["struct<".len()..trimmed.len() - 1]);
        }
        match lower.as_str() {
            "uint8" | "u8" => Ok(ElementType::UInt8),
            "int64" | "i64" => Ok(ElementType::Int64),
            "string" | "utf8" => Ok(ElementType::Utf8),
            "bytes" => Ok(ElementType::Bytes),
            other => Err(StreamError::config(format!("unknown element type '{other}'"))),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ElementType::Struct(members) = self else {
            return f.write_str(self.name());
        };
        f.write_str("struct<")?;
        for (i, member) in members.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", member.name, member.dtype)?;
        }
        f.write_str(">")
    }
}

/// One dimension of a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Fixed(usize),
    Variable,
}

impl Dim {
    /// True if a value with extent `actual` fits this dimension.
    pub fn admits(&self, actual: usize) -> bool {
        match self {
            Dim::Fixed(n) => *n == actual,
            Dim::Variable => true,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{n}"),
            Dim::Variable => f.write_str("None"),
        }
    }
}

/// Rank plus per-dimension extents. A scalar has rank 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<Dim>);

impl Shape {
    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    pub fn new(dims: impl Into<Vec<Dim>>) -> Self {
        Self(dims.into())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[Dim] {
        &self.0
    }

    /// True if a value of concrete shape `extents` fits this shape.
    pub fn admits(&self, extents: &[usize]) -> bool {
        self.0.len() == extents.len()
            && self.0.iter().zip(extents).all(|(dim, &n)| dim.admits(n))
    }

    /// True if every value admitted by `other` is admitted by `self`.
    pub fn is_compatible_with(&self, other: &Shape) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(&other.0).all(|(mine, theirs)| match (mine, theirs) {
                (Dim::Variable, _) => true,
                (Dim::Fixed(a), Dim::Fixed(b)) => a == b,
                (Dim::Fixed(_), Dim::Variable) => false,
            })
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}

/// Name, shape and element type of one output field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldSignature {
    pub name: String,
    pub shape: Shape,
    pub dtype: ElementType,
}

impl FieldSignature {
    pub fn new(name: impl Into<String>, shape: Shape, dtype: ElementType) -> Self {
        Self {
            name: name.into(),
            shape,
            dtype,
        }
    }
}

impl fmt::Display for FieldSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}{}", self.name, self.dtype, self.shape)
    }
}

/// The fields produced by one dataset branch, in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct OutputSignature(Vec<FieldSignature>);

impl OutputSignature {
    pub fn new(fields: impl Into<Vec<FieldSignature>>) -> Self {
        Self(fields.into())
    }

    pub fn single(name: impl Into<String>, shape: Shape, dtype: ElementType) -> Self {
        Self(vec![FieldSignature::new(name, shape, dtype)])
    }

    pub fn fields(&self) -> &[FieldSignature] {
        &self.0
    }

    /// True if every value matching `resolved` also matches `self`.
    pub fn accepts(&self, resolved: &OutputSignature) -> bool {
        self.0.len() == resolved.0.len()
            && self.0.iter().zip(&resolved.0).all(|(declared, actual)| {
                declared.dtype == actual.dtype && declared.shape.is_compatible_with(&actual.shape)
            })
    }
}

impl fmt::Display for OutputSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field}")?;
        }
        f.write_str(")")
    }
}

/// A typed value produced by decoding one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedValue {
    /// Row-major `rows x cols` pixel matrix.
    Image {
        rows: usize,
        cols: usize,
        pixels: Vec<u8>,
    },
    Label(u8),
    Text(String),
    Int64(i64),
    Bytes(Vec<u8>),
    KeyValue {
        key: Box<DecodedValue>,
        value: Box<DecodedValue>,
    },
    /// Named members, in the order of their struct type.
    Struct(Vec<(String, DecodedValue)>),
}

impl DecodedValue {
    /// Element type and concrete extents of each field this value carries.
    pub fn fields(&self) -> Vec<(ElementType, Vec<usize>)> {
        match self {
            DecodedValue::Image { rows, cols, .. } => vec![(ElementType::UInt8, vec![*rows, *cols])],
            DecodedValue::Label(_) => vec![(ElementType::UInt8, Vec::new())],
            DecodedValue::Text(_) => vec![(ElementType::Utf8, Vec::new())],
            DecodedValue::Int64(_) => vec![(ElementType::Int64, Vec::new())],
            DecodedValue::Bytes(_) => vec![(ElementType::Bytes, Vec::new())],
            DecodedValue::KeyValue { key, value } => {
                let mut fields = key.fields();
                fields.extend(value.fields());
                fields
            }
            DecodedValue::Struct(_) => vec![(self.element_type(), Vec::new())],
        }
    }

    /// Element type of this value taken as a single field.
    pub fn element_type(&self) -> ElementType {
        match self {
            DecodedValue::Image { .. } | DecodedValue::Label(_) => ElementType::UInt8,
            DecodedValue::Text(_) => ElementType::Utf8,
            DecodedValue::Int64(_) => ElementType::Int64,
            DecodedValue::Bytes(_) => ElementType::Bytes,
            DecodedValue::KeyValue { key, value } => ElementType::struct_of([
                ("key", key.element_type()),
                ("value", value.element_type()),
            ]),
            DecodedValue::Struct(members) => ElementType::struct_of(
                members
                    .iter()
                    .map(|(name, value)| (name.clone(), value.element_type())),
            ),
        }
    }

    /// Looks up a struct member by name.
    pub fn member(&self, name: &str) -> Option<&DecodedValue> {
        match self {
            DecodedValue::Struct(members) => members
                .iter()
                .find(|(member, _)| member == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// True if this value matches `signature`.
    pub fn conforms_to(&self, signature: &OutputSignature) -> bool {
        let fields = self.fields();
        fields.len() == signature.fields().len()
            && fields
                .iter()
                .zip(signature.fields())
                .all(|((dtype, extents), declared)| {
                    *dtype == declared.dtype && declared.shape.admits(extents)
                })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DecodedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            DecodedValue::Bytes(b) => Some(b),
            DecodedValue::Image { pixels, .. } => Some(pixels),
            _ => None,
        }
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Image { rows, cols, .. } => write!(f, "image[{rows}x{cols}]"),
            DecodedValue::Label(label) => write!(f, "{label}"),
            DecodedValue::Text(text) => f.write_str(text),
            DecodedValue::Int64(n) => write!(f, "{n}"),
            DecodedValue::Bytes(bytes) => {
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            DecodedValue::KeyValue { key, value } => write!(f, "{key}\t{value}"),
            DecodedValue::Struct(members) => {
                f.write_str("{")?;
                for (i, (name, value)) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_signature() -> OutputSignature {
        OutputSignature::single(
            "image",
            Shape::new([Dim::Variable, Dim::Variable]),
            ElementType::UInt8,
        )
    }

    #[test]
    fn test_display() {
        assert_eq!(image_signature().to_string(), "(image: uint8[None, None])");
        assert_eq!(
            OutputSignature::single("label", Shape::scalar(), ElementType::UInt8).to_string(),
            "(label: uint8[])"
        );
    }

    #[test]
    fn test_accepts_resolved_dims() {
        let resolved = OutputSignature::single(
            "image",
            Shape::new([Dim::Fixed(28), Dim::Fixed(28)]),
            ElementType::UInt8,
        );
        assert!(image_signature().accepts(&resolved));
        assert!(!resolved.accepts(&image_signature()));

        let wrong_type = OutputSignature::single(
            "image",
            Shape::new([Dim::Variable, Dim::Variable]),
            ElementType::Int64,
        );
        assert!(!image_signature().accepts(&wrong_type));

        let wrong_rank = OutputSignature::single("image", Shape::scalar(), ElementType::UInt8);
        assert!(!image_signature().accepts(&wrong_rank));
    }

    #[test]
    fn test_value_conformance() {
        let value = DecodedValue::Image {
            rows: 2,
            cols: 3,
            pixels: vec![0; 6],
        };
        assert!(value.conforms_to(&image_signature()));
        assert!(!DecodedValue::Label(1).conforms_to(&image_signature()));

        let kv = DecodedValue::KeyValue {
            key: Box::new(DecodedValue::Int64(42)),
            value: Box::new(DecodedValue::Text("x".to_string())),
        };
        let kv_signature = OutputSignature::new(vec![
            FieldSignature::new("key", Shape::scalar(), ElementType::Int64),
            FieldSignature::new("value", Shape::scalar(), ElementType::Utf8),
        ]);
        assert!(kv.conforms_to(&kv_signature));
        assert_eq!(kv.to_string(), "42\tx");
    }

    #[test]
    fn test_element_type_names() {
        for dtype in [ElementType::UInt8, ElementType::Int64, ElementType::Utf8, ElementType::Bytes] {
            assert_eq!(dtype.name().parse::<ElementType>().unwrap(), dtype);
        }
        assert!("float32".parse::<ElementType>().is_err());
    }

    #[test]
    fn test_struct_type_parse_and_display() {
        let row = ElementType::struct_of([("NAME", ElementType::Utf8), ("VAL", ElementType::Int64)]);
        assert_eq!(row.to_string(), "struct<NAME: string, VAL: int64>");
        assert_eq!(row.to_string().parse::<ElementType>().unwrap(), row);
        assert_eq!("STRUCT<NAME:utf8,VAL:i64>".parse::<ElementType>().unwrap(), row);

        let nested: ElementType = "struct<id: int64, inner: struct<a: u8, b: bytes>>".parse().unwrap();
        let members = nested.members().unwrap();
        assert_eq!(members[0].name, "id");
        assert_eq!(
            members[1].dtype,
            ElementType::struct_of([("a", ElementType::UInt8), ("b", ElementType::Bytes)])
        );

        assert!("struct<>".parse::<ElementType>().is_err());
        assert!("struct<NAME>".parse::<ElementType>().is_err());
        assert!("struct<NAME: float32>".parse::<ElementType>().is_err());
    }

    #[test]
    fn test_struct_value_conformance() {
        let row = DecodedValue::Struct(vec![
            ("NAME".to_string(), DecodedValue::Text("TEST1".to_string())),
            ("VAL".to_string(), DecodedValue::Int64(42)),
        ]);
        let signature = OutputSignature::new(vec![FieldSignature::new(
            "val",
            Shape::scalar(),
            ElementType::struct_of([("NAME", ElementType::Utf8), ("VAL", ElementType::Int64)]),
        )]);
        assert!(row.conforms_to(&signature));
        assert_eq!(row.member("VAL"), Some(&DecodedValue::Int64(42)));
        assert_eq!(row.member("missing"), None);
        assert_eq!(row.to_string(), "{NAME: TEST1, VAL: 42}");

        let renamed = OutputSignature::new(vec![FieldSignature::new(
            "val",
            Shape::scalar(),
            ElementType::struct_of([("name", ElementType::Utf8), ("VAL", ElementType::Int64)]),
        )]);
        assert!(!row.conforms_to(&renamed));
    }
}
