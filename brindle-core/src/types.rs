// The type graph
//
// Types are immutable once issued and always owned by a registry; code
// passes `TypeRef` handles around. Within one registry structural identity
// and handle identity coincide, so equality here is id equality.

use std::fmt;
use std::sync::Arc;

/// Shared handle to a registered type
pub type TypeRef = Arc<Type>;

/// First id available to compound and alias types; 19-22 are reserved
pub const FIRST_COMPOUND_ID: u64 = 23;

/// The fixed primitive types, with their wire ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    Byte,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float64,
    String,
    Bytes,
    Bstring,
    Enum,
    Ip,
    Port,
    Net,
    Time,
    Duration,
    Null,
}

pub const PRIMITIVES: [Primitive; 19] = [
    Primitive::Bool,
    Primitive::Byte,
    Primitive::Int16,
    Primitive::Uint16,
    Primitive::Int32,
    Primitive::Uint32,
    Primitive::Int64,
    Primitive::Uint64,
    Primitive::Float64,
    Primitive::String,
    Primitive::Bytes,
    Primitive::Bstring,
    Primitive::Enum,
    Primitive::Ip,
    Primitive::Port,
    Primitive::Net,
    Primitive::Time,
    Primitive::Duration,
    Primitive::Null,
];

impl Primitive {
    /// Wire constant for this primitive
    pub fn id(self) -> u64 {
        self as u64
    }

    pub fn from_id(id: u64) -> Option<Primitive> {
        PRIMITIVES.get(usize::try_from(id).ok()?).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Byte => "byte",
            Primitive::Int16 => "int16",
            Primitive::Uint16 => "uint16",
            Primitive::Int32 => "int32",
            Primitive::Uint32 => "uint32",
            Primitive::Int64 => "int64",
            Primitive::Uint64 => "uint64",
            Primitive::Float64 => "float64",
            Primitive::String => "string",
            Primitive::Bytes => "bytes",
            Primitive::Bstring => "bstring",
            Primitive::Enum => "enum",
            Primitive::Ip => "ip",
            Primitive::Port => "port",
            Primitive::Net => "net",
            Primitive::Time => "time",
            Primitive::Duration => "duration",
            Primitive::Null => "null",
        }
    }

    pub fn from_name(name: &str) -> Option<Primitive> {
        PRIMITIVES.iter().copied().find(|p| p.name() == name)
    }
}

/// Named column of a record type
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub ty: TypeRef,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Column {
            name: name.into(),
            ty,
        }
    }
}

/// Structural variants of a type
#[derive(Debug, Clone)]
pub enum Kind {
    Primitive(Primitive),
    /// Ordered columns; order is semantically significant, names unique
    Record(Vec<Column>),
    Array(TypeRef),
    /// Element type must be primitive; elements stored in ascending
    /// encoded order
    Set(TypeRef),
    /// At least one distinct member; values select a member by index
    Union(Vec<TypeRef>),
    /// A named binding with its own identity that encodes as its target
    Alias { name: String, target: TypeRef },
}

/// A registered type: stream-scoped id plus structure
#[derive(Debug)]
pub struct Type {
    id: u64,
    kind: Kind,
}

impl Type {
    pub(crate) fn new(id: u64, kind: Kind) -> Self {
        Type { id, kind }
    }

    /// Stream-scoped type id: 0-18 for primitives, 23+ for compounds and
    /// aliases
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// Chase alias bindings down to the underlying structural type
    pub fn resolved(&self) -> &Type {
        let mut t = self;
        while let Kind::Alias { target, .. } = &t.kind {
            t = target;
        }
        t
    }

    /// True for record, array, set, and union (aliases resolve first)
    pub fn is_container(&self) -> bool {
        matches!(
            self.resolved().kind,
            Kind::Record(_) | Kind::Array(_) | Kind::Set(_) | Kind::Union(_)
        )
    }

    /// Element type for array and set types
    pub fn inner_type(&self) -> Option<&TypeRef> {
        match &self.resolved().kind {
            Kind::Array(elem) | Kind::Set(elem) => Some(elem),
            _ => None,
        }
    }

    /// Columns for record types
    pub fn columns(&self) -> Option<&[Column]> {
        match &self.resolved().kind {
            Kind::Record(cols) => Some(cols),
            _ => None,
        }
    }

    /// Members for union types
    pub fn members(&self) -> Option<&[TypeRef]> {
        match &self.resolved().kind {
            Kind::Union(members) => Some(members),
            _ => None,
        }
    }

    /// The canonical printed form: the registry key, stable across
    /// implementations. No whitespace, members in declaration order,
    /// aliases by name.
    pub fn key(&self) -> String {
        self.kind.key()
    }
}

impl Kind {
    /// Canonical printed form of a not-yet-registered structure; the
    /// registry interns on this string
    pub(crate) fn key(&self) -> String {
        let mut out = String::new();
        write_key(&mut out, self);
        out
    }
}

fn write_key(out: &mut String, kind: &Kind) {
    match kind {
        Kind::Primitive(p) => out.push_str(p.name()),
        Kind::Record(cols) => {
            out.push_str("record[");
            for (i, col) in cols.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&col.name);
                out.push(':');
                write_key(out, col.ty.kind());
            }
            out.push(']');
        }
        Kind::Array(elem) => {
            out.push_str("array[");
            write_key(out, elem.kind());
            out.push(']');
        }
        Kind::Set(elem) => {
            out.push_str("set[");
            write_key(out, elem.kind());
            out.push(']');
        }
        Kind::Union(members) => {
            out.push_str("union[");
            for (i, m) in members.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_key(out, m.kind());
            }
            out.push(']');
        }
        Kind::Alias { name, .. } => out.push_str(name),
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

// Identity within a registry is id identity; comparing handles from
// different registries is meaningless.
impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Type {}

impl std::hash::Hash for Type {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Handle equality: true when both refs point at the same registered type
pub fn same_type(a: &TypeRef, b: &TypeRef) -> bool {
    Arc::ptr_eq(a, b)
}
