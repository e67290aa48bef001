//! Element type registry
//!
//! One table maps every logical element type to its persisted description
//! (class, sign, width). Array creation, type matching and read-back all
//! go through [`ElementType`]; nothing else re-derives the mapping.

use serde::{Deserialize, Serialize};

/// Size in bytes of one persisted variable-length string element
/// (heap offset + byte length).
pub const STRING_REF_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeClass {
    Integer,
    Float,
    String,
}

impl TypeClass {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeClass::Integer => "integer",
            TypeClass::Float => "float",
            TypeClass::String => "string",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signedness {
    Unsigned,
    Signed,
    NotApplicable,
}

/// Type description as stored in the container catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersistedType {
    pub class: TypeClass,
    pub sign: Signedness,
    pub size: u32,
}

impl std::fmt::Display for PersistedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match ElementType::from_persisted(self) {
            Some(t) => f.write_str(t.name()),
            None => write!(f, "{}({:?}, {} bytes)", self.class.as_str(), self.sign, self.size),
        }
    }
}

/// Logical element type of an array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    UInt64,
    Int64,
    Float32,
    Float64,
    Utf8,
}

struct TypeEntry {
    ty: ElementType,
    name: &'static str,
    persisted: PersistedType,
}

const fn int(ty: ElementType, name: &'static str, sign: Signedness, size: u32) -> TypeEntry {
    TypeEntry { ty, name, persisted: PersistedType { class: TypeClass::Integer, sign, size } }
}

const fn float(ty: ElementType, name: &'static str, size: u32) -> TypeEntry {
    TypeEntry {
        ty,
        name,
        persisted: PersistedType { class: TypeClass::Float, sign: Signedness::NotApplicable, size },
    }
}

// Row order must follow the ElementType discriminants.
const REGISTRY: [TypeEntry; 11] = [
    int(ElementType::UInt8, "uint8", Signedness::Unsigned, 1),
    int(ElementType::Int8, "int8", Signedness::Signed, 1),
    int(ElementType::UInt16, "uint16", Signedness::Unsigned, 2),
    int(ElementType::Int16, "int16", Signedness::Signed, 2),
    int(ElementType::UInt32, "uint32", Signedness::Unsigned, 4),
    int(ElementType::Int32, "int32", Signedness::Signed, 4),
    int(ElementType::UInt64, "uint64", Signedness::Unsigned, 8),
    int(ElementType::Int64, "int64", Signedness::Signed, 8),
    float(ElementType::Float32, "float32", 4),
    float(ElementType::Float64, "float64", 8),
    TypeEntry {
        ty: ElementType::Utf8,
        name: "string",
        persisted: PersistedType {
            class: TypeClass::String,
            sign: Signedness::NotApplicable,
            size: STRING_REF_SIZE as u32,
        },
    },
];

impl ElementType {
    pub const ALL: [ElementType; 11] = [
        ElementType::UInt8,
        ElementType::Int8,
        ElementType::UInt16,
        ElementType::Int16,
        ElementType::UInt32,
        ElementType::Int32,
        ElementType::UInt64,
        ElementType::Int64,
        ElementType::Float32,
        ElementType::Float64,
        ElementType::Utf8,
    ];

    fn entry(self) -> &'static TypeEntry {
        &REGISTRY[self as usize]
    }

    /// Registry name, e.g. `"float32"` or `"string"`
    pub fn name(self) -> &'static str {
        self.entry().name
    }

    /// Look up a type by name (case-insensitive, surrounding whitespace ignored)
    pub fn from_name(text: &str) -> Option<Self> {
        let wanted = text.trim().to_ascii_lowercase();
        REGISTRY.iter().find(|e| e.name == wanted).map(|e| e.ty)
    }

    pub fn persisted(self) -> PersistedType {
        self.entry().persisted
    }

    /// Strict reverse mapping: class, sign and width must all match a row.
    pub fn from_persisted(p: &PersistedType) -> Option<Self> {
        REGISTRY.iter().find(|e| e.persisted == *p).map(|e| e.ty)
    }

    /// Bytes per element on disk
    pub fn size(self) -> usize {
        self.entry().persisted.size as usize
    }

    pub fn class(self) -> TypeClass {
        self.entry().persisted.class
    }

    pub fn sign(self) -> Signedness {
        self.entry().persisted.sign
    }

    pub fn is_numeric(self) -> bool {
        self.class() != TypeClass::String
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Sample format of a captured trace
///
/// The closed set of numeric types a scope channel can produce. Each
/// variant maps to exactly one registry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Real32,
    Real64,
}

impl SampleType {
    pub fn element_type(self) -> ElementType {
        match self {
            SampleType::UInt8 => ElementType::UInt8,
            SampleType::Int8 => ElementType::Int8,
            SampleType::UInt16 => ElementType::UInt16,
            SampleType::Int16 => ElementType::Int16,
            SampleType::UInt32 => ElementType::UInt32,
            SampleType::Int32 => ElementType::Int32,
            SampleType::Real32 => ElementType::Float32,
            SampleType::Real64 => ElementType::Float64,
        }
    }

    pub fn from_element_type(ty: ElementType) -> Option<Self> {
        match ty {
            ElementType::UInt8 => Some(SampleType::UInt8),
            ElementType::Int8 => Some(SampleType::Int8),
            ElementType::UInt16 => Some(SampleType::UInt16),
            ElementType::Int16 => Some(SampleType::Int16),
            ElementType::UInt32 => Some(SampleType::UInt32),
            ElementType::Int32 => Some(SampleType::Int32),
            ElementType::Float32 => Some(SampleType::Real32),
            ElementType::Float64 => Some(SampleType::Real64),
            _ => None,
        }
    }

    pub fn size(self) -> usize {
        self.element_type().size()
    }

    pub fn name(self) -> &'static str {
        self.element_type().name()
    }
}

impl std::fmt::Display for SampleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Rust scalar that can be stored as a trace sample.
///
/// Provides the row serialization for its [`SampleType`], so callers never
/// switch over the sample type to build a byte buffer.
pub trait Sample: Copy + Send + Sync + 'static {
    const SAMPLE_TYPE: SampleType;

    /// Append the little-endian encoding of `values` to `out`.
    fn extend_le_bytes(values: &[Self], out: &mut Vec<u8>);

    /// Decode little-endian bytes; a trailing partial element is ignored.
    fn decode_le_bytes(bytes: &[u8]) -> Vec<Self>;

    fn to_le_bytes_vec(values: &[Self]) -> Vec<u8> {
        let mut out = Vec::with_capacity(values.len() * Self::SAMPLE_TYPE.size());
        Self::extend_le_bytes(values, &mut out);
        out
    }
}

macro_rules! impl_sample {
    ($t:ty, $variant:ident) => {
        impl Sample for $t {
            const SAMPLE_TYPE: SampleType = SampleType::$variant;

            fn extend_le_bytes(values: &[Self], out: &mut Vec<u8>) {
                out.reserve(values.len() * std::mem::size_of::<$t>());
                for v in values {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }

            fn decode_le_bytes(bytes: &[u8]) -> Vec<Self> {
                bytes
                    .chunks_exact(std::mem::size_of::<$t>())
                    .map(|c| {
                        let mut raw = [0u8; std::mem::size_of::<$t>()];
                        raw.copy_from_slice(c);
                        <$t>::from_le_bytes(raw)
                    })
                    .collect()
            }
        }
    };
}

impl_sample!(u8, UInt8);
impl_sample!(i8, Int8);
impl_sample!(u16, UInt16);
impl_sample!(i16, Int16);
impl_sample!(u32, UInt32);
impl_sample!(i32, Int32);
impl_sample!(f32, Real32);
impl_sample!(f64, Real64);
