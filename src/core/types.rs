//! Purpose: Small value types shared across the engine: type descriptors, byte order,
//! context ids, chain tags, and the column spec accepted by `Cursor::add_column`.
//! Exports: `TypeDesc`, `Typedecl`, `Domain`, `ByteOrder`, `CtxId`, `Chain`, `ColumnSpec`.
//! Invariants: `TypeDesc::size_bits` is `intrinsic_bits * intrinsic_dim`.

use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Domain {
    Bool,
    Uint,
    Int,
    Float,
    Ascii,
    Unicode,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct TypeDesc {
    pub intrinsic_bits: u32,
    pub intrinsic_dim: u32,
    pub domain: Domain,
}

impl TypeDesc {
    pub const fn new(intrinsic_bits: u32, intrinsic_dim: u32, domain: Domain) -> Self {
        Self {
            intrinsic_bits,
            intrinsic_dim,
            domain,
        }
    }

    pub const fn u8() -> Self {
        Self::new(8, 1, Domain::Uint)
    }

    pub const fn u32() -> Self {
        Self::new(32, 1, Domain::Uint)
    }

    pub const fn i64() -> Self {
        Self::new(64, 1, Domain::Int)
    }

    pub const fn ascii() -> Self {
        Self::new(8, 1, Domain::Ascii)
    }

    pub fn size_bits(&self) -> u32 {
        self.intrinsic_bits * self.intrinsic_dim
    }
}

/// Declared column type as named in a cast expression, e.g. `(U32)READ_LEN`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Typedecl {
    pub type_name: String,
    pub dim: u32,
}

impl Typedecl {
    pub fn new(type_name: impl Into<String>, dim: u32) -> Self {
        Self {
            type_name: type_name.into(),
            dim,
        }
    }
}

impl fmt::Display for Typedecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dim > 1 {
            write!(f, "{}[{}]", self.type_name, self.dim)
        } else {
            f.write_str(&self.type_name)
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum ByteOrder {
    #[default]
    Native,
    Little,
    Big,
}

impl ByteOrder {
    /// Resolve `Native` to the concrete order of this target.
    pub fn concrete(self) -> ByteOrder {
        match self {
            ByteOrder::Native if cfg!(target_endian = "little") => ByteOrder::Little,
            ByteOrder::Native => ByteOrder::Big,
            other => other,
        }
    }

    pub fn is_foreign(self) -> bool {
        self.concrete() != ByteOrder::Native.concrete()
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ByteOrder::Native => 0,
            ByteOrder::Little => 1,
            ByteOrder::Big => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ByteOrder::Native),
            1 => Some(ByteOrder::Little),
            2 => Some(ByteOrder::Big),
            _ => None,
        }
    }
}

/// Two-level schema context id used to look productions and columns up.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct CtxId {
    pub ctx: u32,
    pub id: u32,
}

impl CtxId {
    pub const fn new(ctx: u32, id: u32) -> Self {
        Self { ctx, id }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Chain {
    Encoding,
    #[default]
    Decoding,
    Uncommitted,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum ColumnSpec {
    Name(String),
    Cast(Typedecl, String),
}

impl ColumnSpec {
    pub fn name(name: impl Into<String>) -> Self {
        ColumnSpec::Name(name.into())
    }

    pub fn cast(typedecl: Typedecl, name: impl Into<String>) -> Self {
        ColumnSpec::Cast(typedecl, name.into())
    }

    pub fn column_name(&self) -> &str {
        match self {
            ColumnSpec::Name(name) | ColumnSpec::Cast(_, name) => name,
        }
    }

    pub fn typedecl(&self) -> Option<&Typedecl> {
        match self {
            ColumnSpec::Name(_) => None,
            ColumnSpec::Cast(typedecl, _) => Some(typedecl),
        }
    }
}

impl fmt::Display for ColumnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnSpec::Name(name) => f.write_str(name),
            ColumnSpec::Cast(typedecl, name) => write!(f, "({typedecl}){name}"),
        }
    }
}

impl From<&str> for ColumnSpec {
    fn from(name: &str) -> Self {
        ColumnSpec::Name(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{ByteOrder, ColumnSpec, TypeDesc, Typedecl};

    #[test]
    fn cast_spec_renders_like_schema_text() {
        let spec = ColumnSpec::cast(Typedecl::new("U8", 4), "QUALITY");
        assert_eq!(spec.to_string(), "(U8[4])QUALITY");
        assert_eq!(spec.column_name(), "QUALITY");
        assert_eq!(ColumnSpec::from("READ").typedecl(), None);
    }

    #[test]
    fn native_order_is_never_foreign() {
        assert!(!ByteOrder::Native.is_foreign());
        assert_ne!(ByteOrder::Little.is_foreign(), ByteOrder::Big.is_foreign());
        assert_eq!(TypeDesc::u32().size_bits(), 32);
    }
}
