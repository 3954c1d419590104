// Field-path evaluator
//
// A path expression addresses a position inside a record value: a top
// field name composed with nested field reads and array indexes. The AST
// arrives from the external query planner (as JSON, hence the serde
// derives) and compiles into a flat op list that evaluates against any
// record value, returning the typed byte slice at the addressed position
// without materializing anything in between.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TypeError, ValueError};
use crate::tag::Iter;
use crate::types::TypeRef;
use crate::value::Value;

/// Path expression AST
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathExpr {
    /// The top-level field reference every path starts from
    Field { name: String },
    /// Nested field read on a record-typed intermediate
    Access { from: Box<PathExpr>, name: String },
    /// Index into an array- or set-typed intermediate
    Index { from: Box<PathExpr>, index: i64 },
    /// Element count; printed here, evaluated via `Value::container_len`
    Len { from: Box<PathExpr> },
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathExpr::Field { name } => f.write_str(name),
            PathExpr::Access { from, name } => write!(f, "{}.{}", from, name),
            PathExpr::Index { from, index } => write!(f, "{}[{}]", from, index),
            PathExpr::Len { from } => write!(f, "len({})", from),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Field(String),
    Index(u64),
}

/// A compiled path: the top field name plus the ops applied to it, in
/// evaluation order
#[derive(Debug, Clone)]
pub struct Path {
    top: String,
    ops: Vec<Op>,
}

/// Flatten a path AST, innermost-outward, into the top field name and an
/// evaluatable op list. Negative indexes are rejected here, at compile
/// time.
pub fn compile(expr: &PathExpr) -> Result<Path> {
    let mut ops = Vec::new();
    let mut node = expr;
    let top = loop {
        match node {
            PathExpr::Field { name } => break name.clone(),
            PathExpr::Access { from, name } => {
                ops.push(Op::Field(name.clone()));
                node = from;
            }
            PathExpr::Index { from, index } => {
                let index =
                    u64::try_from(*index).map_err(|_| ValueError::IndexOutOfBounds)?;
                ops.push(Op::Index(index));
                node = from;
            }
            PathExpr::Len { .. } => {
                return Err(TypeError::Invalid(
                    "len() is not a path operation; use container_len".to_string(),
                )
                .into())
            }
        }
    };
    ops.reverse();
    Ok(Path { top, ops })
}

/// Compile a batch of paths, failing on the first bad one
pub fn compile_paths(exprs: &[PathExpr]) -> Result<Vec<Path>> {
    exprs.iter().map(compile).collect()
}

impl Path {
    /// The field the path starts from
    pub fn top(&self) -> &str {
        &self.top
    }

    /// Resolve this path against a record value.
    ///
    /// Returns `None` when no type can be assigned to the result (the top
    /// field is absent, a field read hits a non-record, an index hits a
    /// non-array). Returns a typed unset value when the position exists in
    /// the type but carries no bytes (unset intermediates, out-of-bounds
    /// indexes), so downstream type-directed operations stay defined.
    /// Evaluation is pure: no state, no allocation beyond refcounts.
    pub fn evaluate(&self, record: &Value) -> Option<Value> {
        let mut current = field_read(record, &self.top)?;
        for op in &self.ops {
            current = match op {
                Op::Field(name) => field_read(&current, name)?,
                Op::Index(n) => index_read(&current, *n)?,
            };
        }
        Some(current)
    }
}

fn field_read(current: &Value, name: &str) -> Option<Value> {
    let cols = current.ty.columns()?;
    // Linear scan: records arrive with per-instance column sets, so a
    // lookup table would have to be keyed per type handle
    let pos = cols.iter().position(|c| c.name == name)?;
    let col_ty = cols[pos].ty.clone();
    element_at(current, col_ty, pos)
}

fn index_read(current: &Value, n: u64) -> Option<Value> {
    let elem_ty = current.ty.inner_type()?.clone();
    let pos = usize::try_from(n).ok()?;
    element_at(current, elem_ty, pos)
}

// The element at ordinal `pos`, typed `ty`; past-the-end reads as the
// typed unset sentinel
fn element_at(parent: &Value, ty: TypeRef, pos: usize) -> Option<Value> {
    let body = match &parent.body {
        Some(b) => b,
        None => return Some(Value::unset(ty)),
    };
    let mut it = Iter::new(body);
    for _ in 0..pos {
        match it.next() {
            Some(Ok(_)) => {}
            Some(Err(_)) => return None,
            None => return Some(Value::unset(ty)),
        }
    }
    match it.next() {
        Some(Ok(element)) => Some(Value {
            ty,
            body: element.body.map(|s| body.slice_ref(s)),
        }),
        Some(Err(_)) => None,
        None => Some(Value::unset(ty)),
    }
}
