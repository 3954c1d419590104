// Stream-scoped type registry
//
// The registry owns every Type handle for one stream. Compound types are
// interned on their canonical printed form, so structurally identical
// types resolve to one handle and equality degenerates to handle equality.
// Ids are allocated sequentially from FIRST_COMPOUND_ID in the order
// typedefs arrive, which makes allocation deterministic and reproducible
// on both sides of the wire.
//
// Locking follows the shared-reader / exclusive-writer discipline:
// resolution takes the read lock, interning re-checks under the write lock
// so a racing double-intern converges on the first winner.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Result, TypeError};
use crate::grammar;
use crate::types::{Column, Kind, Primitive, Type, TypeRef, FIRST_COMPOUND_ID, PRIMITIVES};

pub struct Registry {
    primitives: Vec<TypeRef>,
    inner: RwLock<Inner>,
}

struct Inner {
    by_key: HashMap<String, TypeRef>,
    by_id: HashMap<u64, TypeRef>,
    next_id: u64,
}

impl Registry {
    pub fn new() -> Self {
        let primitives: Vec<TypeRef> = PRIMITIVES
            .iter()
            .map(|&p| Arc::new(Type::new(p.id(), Kind::Primitive(p))))
            .collect();
        let by_key = primitives
            .iter()
            .map(|t| (t.key(), t.clone()))
            .collect();
        Registry {
            primitives,
            inner: RwLock::new(Inner {
                by_key,
                by_id: HashMap::new(),
                next_id: FIRST_COMPOUND_ID,
            }),
        }
    }

    /// Singleton handle for a primitive type
    pub fn primitive(&self, p: Primitive) -> TypeRef {
        self.primitives[p.id() as usize].clone()
    }

    /// Resolve a primitive wire id (0-18)
    pub fn lookup_primitive(&self, id: u64) -> Result<TypeRef> {
        Primitive::from_id(id)
            .map(|p| self.primitive(p))
            .ok_or_else(|| TypeError::Unknown(id).into())
    }

    /// Resolve any installed type id
    pub fn resolve_id(&self, id: u64) -> Result<TypeRef> {
        if let Some(p) = Primitive::from_id(id) {
            return Ok(self.primitive(p));
        }
        self.inner
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| TypeError::Unknown(id).into())
    }

    /// Look up a type by its canonical printed form or bound name
    pub fn lookup_key(&self, key: &str) -> Option<TypeRef> {
        self.inner.read().by_key.get(key).cloned()
    }

    pub fn intern_record(&self, columns: Vec<Column>) -> Result<TypeRef> {
        if columns.is_empty() {
            return Err(TypeError::Invalid("record must have at least one column".to_string()).into());
        }
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == col.name) {
                return Err(TypeError::DuplicateField(col.name.clone()).into());
            }
        }
        self.intern(Kind::Record(columns))
    }

    pub fn intern_array(&self, elem: TypeRef) -> Result<TypeRef> {
        self.intern(Kind::Array(elem))
    }

    pub fn intern_set(&self, elem: TypeRef) -> Result<TypeRef> {
        if !matches!(elem.resolved().kind(), Kind::Primitive(_)) {
            return Err(TypeError::Invalid(format!(
                "set element must be a primitive type, not {}",
                elem.key()
            ))
            .into());
        }
        self.intern(Kind::Set(elem))
    }

    pub fn intern_union(&self, members: Vec<TypeRef>) -> Result<TypeRef> {
        if members.is_empty() {
            return Err(TypeError::Invalid("union must have at least one member".to_string()).into());
        }
        for (i, m) in members.iter().enumerate() {
            if members[..i].iter().any(|other| other.id() == m.id()) {
                return Err(
                    TypeError::Invalid(format!("duplicate union member {}", m.key())).into(),
                );
            }
        }
        self.intern(Kind::Union(members))
    }

    pub fn intern_alias(&self, name: &str, target: TypeRef) -> Result<TypeRef> {
        if !grammar::is_identifier(name) {
            return Err(TypeError::Invalid(format!("alias name {:?} is not an identifier", name)).into());
        }
        if Primitive::from_name(name).is_some() {
            return Err(TypeError::AliasShadowsPrimitive(name.to_string()).into());
        }
        if matches!(name, "record" | "array" | "set" | "union") {
            return Err(TypeError::Invalid(format!("alias name {} is reserved", name)).into());
        }
        if let Some(existing) = self.lookup_key(name) {
            return Self::check_rebind(name, &existing, &target).map(|_| existing);
        }
        let mut guard = self.inner.write();
        if let Some(existing) = guard.by_key.get(name).cloned() {
            return Self::check_rebind(name, &existing, &target).map(|_| existing);
        }
        let id = guard.next_id;
        guard.next_id += 1;
        let ty: TypeRef = Arc::new(Type::new(
            id,
            Kind::Alias {
                name: name.to_string(),
                target,
            },
        ));
        guard.by_key.insert(name.to_string(), ty.clone());
        guard.by_id.insert(id, ty.clone());
        debug!(id, name, "installed alias");
        Ok(ty)
    }

    // Re-binding an alias to the identical target is idempotent; anything
    // else is a conflict.
    fn check_rebind(name: &str, existing: &TypeRef, target: &TypeRef) -> Result<()> {
        match existing.kind() {
            Kind::Alias { target: bound, .. } if Arc::ptr_eq(bound, target) => Ok(()),
            _ => Err(TypeError::AliasRedefined(name.to_string()).into()),
        }
    }

    fn intern(&self, kind: Kind) -> Result<TypeRef> {
        let key = kind.key();
        if let Some(existing) = self.inner.read().by_key.get(&key) {
            return Ok(existing.clone());
        }
        let mut guard = self.inner.write();
        if let Some(existing) = guard.by_key.get(&key) {
            return Ok(existing.clone());
        }
        let id = guard.next_id;
        guard.next_id += 1;
        let ty: TypeRef = Arc::new(Type::new(id, kind));
        guard.by_key.insert(key.clone(), ty.clone());
        guard.by_id.insert(id, ty.clone());
        debug!(id, key = %key, "interned type");
        Ok(ty)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}
