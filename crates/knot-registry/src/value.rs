//! Native values: records tagged with their type name.

use knot_types::Hash;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};

/// Target of a typed reference: the schema of the object plus its key.
///
/// A blank target has a null object hash.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DynamicRef {
    pub schema: Hash,
    pub object: Hash,
}

impl DynamicRef {
    pub fn new(schema: Hash, object: Hash) -> Self {
        Self { schema, object }
    }

    /// A target that points nowhere.
    pub fn blank() -> Self {
        Self::default()
    }

    pub fn is_blank(&self) -> bool {
        self.object.is_null()
    }
}

/// A field value. Each variant matches one [`Kind`](crate::Kind).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Str(String),
    Bytes(Vec<u8>),
    Reference(Hash),
    Dynamic(DynamicRef),
    References(Vec<DynamicRef>),
    List(Vec<Value>),
    Record(Record),
}

impl Value {
    /// Short name of the variant, used in mismatch errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Uint(_) => "uint",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Reference(_) => "ref",
            Self::Dynamic(_) => "dynamic",
            Self::References(_) => "refs",
            Self::List(_) => "list",
            Self::Record(_) => "record",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Uint(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<Hash> {
        match self {
            Self::Reference(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_dynamic(&self) -> Option<DynamicRef> {
        match self {
            Self::Dynamic(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_references(&self) -> Option<&[DynamicRef]> {
        match self {
            Self::References(refs) => Some(refs),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    fn collect_refs(&self, out: &mut Vec<DynamicRef>) {
        match self {
            Self::Dynamic(d) => out.push(*d),
            Self::References(refs) => out.extend(refs.iter().copied()),
            Self::List(items) => items.iter().for_each(|v| v.collect_refs(out)),
            Self::Record(r) => r.fields.iter().for_each(|(_, v)| v.collect_refs(out)),
            _ => {}
        }
    }

    fn collect_slots<'a>(&'a mut self, out: &mut Vec<Slot<'a>>) {
        match self {
            Self::Dynamic(d) => out.push(Slot::One(d)),
            Self::References(refs) => out.push(Slot::Many(refs)),
            Self::List(items) => items.iter_mut().for_each(|v| v.collect_slots(out)),
            Self::Record(r) => r.fields.iter_mut().for_each(|(_, v)| v.collect_slots(out)),
            _ => {}
        }
    }

    fn collect_refs_mut<'a>(&'a mut self, out: &mut Vec<&'a mut DynamicRef>) {
        match self {
            Self::Dynamic(d) => out.push(d),
            Self::References(refs) => out.extend(refs.iter_mut()),
            Self::List(items) => items.iter_mut().for_each(|v| v.collect_refs_mut(out)),
            Self::Record(r) => r
                .fields
                .iter_mut()
                .for_each(|(_, v)| v.collect_refs_mut(out)),
            _ => {}
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<DynamicRef> for Value {
    fn from(v: DynamicRef) -> Self {
        Self::Dynamic(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Self::Record(v)
    }
}

/// Where typed references live inside a record.
enum Slot<'a> {
    /// A `Dynamic` value: exactly one target.
    One(&'a mut DynamicRef),
    /// A `References` value: any number of targets.
    Many(&'a mut Vec<DynamicRef>),
}

/// A native value: its registered type name plus ordered fields.
///
/// The type name is the tag the registry matches against; no runtime type
/// information is involved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub type_name: String,
    pub fields: Vec<(String, Value)>,
}

impl Record {
    /// An empty record of the given type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field append.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Like [`get`](Self::get), but a missing field is a `FieldMismatch`.
    pub fn require(&self, name: &str) -> RegistryResult<&Value> {
        self.get(name).ok_or_else(|| RegistryError::FieldMismatch {
            type_name: self.type_name.clone(),
            reason: format!("missing field `{name}`"),
        })
    }

    /// Replace the value of an existing field.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> RegistryResult<()> {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(RegistryError::FieldMismatch {
                type_name: self.type_name.clone(),
                reason: format!("no field `{name}`"),
            }),
        }
    }

    /// Every typed reference held by this record, in field walk order.
    ///
    /// The walk descends into lists and embedded records. Blank targets are
    /// included so positions line up with [`dynamic_refs_mut`](Self::dynamic_refs_mut).
    pub fn dynamic_refs(&self) -> Vec<DynamicRef> {
        let mut out = Vec::new();
        for (_, v) in &self.fields {
            v.collect_refs(&mut out);
        }
        out
    }

    /// Mutable access to the same references, in the same order.
    pub fn dynamic_refs_mut(&mut self) -> Vec<&mut DynamicRef> {
        let mut out = Vec::new();
        for (_, v) in &mut self.fields {
            v.collect_refs_mut(&mut out);
        }
        out
    }

    /// Point every typed reference at `targets`, given in field walk order.
    ///
    /// When the number of targets differs from [`dynamic_refs`](Self::dynamic_refs),
    /// the record's one `References` value grows or shrinks to absorb the
    /// difference while `Dynamic` slots keep their place around it. Records
    /// with no `References` value, or more than one, only accept the same
    /// count. Returns whether any slot changed.
    pub fn assign_refs(&mut self, targets: &[DynamicRef]) -> RegistryResult<bool> {
        let type_name = self.type_name.clone();
        let mut slots = Vec::new();
        for (_, v) in &mut self.fields {
            v.collect_slots(&mut slots);
        }

        let fixed = slots.iter().filter(|s| matches!(s, Slot::One(_))).count();
        let variable = slots.len() - fixed;
        let current: usize = slots
            .iter()
            .map(|s| match s {
                Slot::One(_) => 1,
                Slot::Many(refs) => refs.len(),
            })
            .sum();
        let resized = targets.len() != current;
        if resized && (variable != 1 || targets.len() < fixed) {
            return Err(RegistryError::FieldMismatch {
                type_name,
                reason: format!(
                    "cannot place {} references into {} single and {} list slots holding {}",
                    targets.len(),
                    fixed,
                    variable,
                    current
                ),
            });
        }

        let mut changed = false;
        let mut rest = targets;
        for slot in slots {
            match slot {
                Slot::One(d) => {
                    let (first, tail) = rest.split_at(1);
                    if *d != first[0] {
                        *d = first[0];
                        changed = true;
                    }
                    rest = tail;
                }
                Slot::Many(refs) => {
                    let n = if resized { targets.len() - fixed } else { refs.len() };
                    let (head, tail) = rest.split_at(n);
                    if refs.as_slice() != head {
                        *refs = head.to_vec();
                        changed = true;
                    }
                    rest = tail;
                }
            }
        }
        Ok(changed)
    }
}
