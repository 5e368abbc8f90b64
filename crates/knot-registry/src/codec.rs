//! Schema-driven payload codec.
//!
//! A record payload is the concatenation of its field values in schema order,
//! each encoded with the deterministic codec from `knot_types::codec`. Field
//! names are not stored; the schema supplies them on decode.

use knot_types::codec;
use serde::de::DeserializeOwned;

use crate::error::{RegistryError, RegistryResult};
use crate::registry::Tables;
use crate::schema::{Kind, Schema};
use crate::value::{DynamicRef, Record, Value};

fn mismatch(schema: &Schema, reason: impl Into<String>) -> RegistryError {
    RegistryError::FieldMismatch {
        type_name: schema.name.clone(),
        reason: reason.into(),
    }
}

/// Append the payload of `record` laid out by `schema` to `out`.
pub(crate) fn encode_record(
    tables: &Tables,
    schema: &Schema,
    record: &Record,
    out: &mut Vec<u8>,
) -> RegistryResult<()> {
    if record.type_name != schema.name {
        return Err(mismatch(
            schema,
            format!("record is tagged {}", record.type_name),
        ));
    }
    if record.fields.len() != schema.fields.len() {
        return Err(mismatch(
            schema,
            format!(
                "expected {} fields, found {}",
                schema.fields.len(),
                record.fields.len()
            ),
        ));
    }
    for (field, (name, value)) in schema.fields.iter().zip(&record.fields) {
        if field.name != *name {
            return Err(mismatch(
                schema,
                format!("expected field `{}`, found `{name}`", field.name),
            ));
        }
        encode_value(tables, schema, &field.name, &field.kind, value, out)?;
    }
    Ok(())
}

fn encode_value(
    tables: &Tables,
    schema: &Schema,
    field: &str,
    kind: &Kind,
    value: &Value,
    out: &mut Vec<u8>,
) -> RegistryResult<()> {
    match (kind, value) {
        (Kind::Bool, Value::Bool(v)) => codec::encode_into(out, v)?,
        (Kind::Int, Value::Int(v)) => codec::encode_into(out, v)?,
        (Kind::Uint, Value::Uint(v)) => codec::encode_into(out, v)?,
        (Kind::Str, Value::Str(v)) => codec::encode_into(out, v)?,
        (Kind::Bytes, Value::Bytes(v)) => codec::encode_into(out, v)?,
        (Kind::Reference, Value::Reference(v)) => codec::encode_into(out, v)?,
        (Kind::Dynamic, Value::Dynamic(v)) => codec::encode_into(out, v)?,
        (Kind::References, Value::References(v)) => codec::encode_into(out, v)?,
        (Kind::List(inner), Value::List(items)) => {
            codec::encode_into(out, &(items.len() as u64))?;
            for item in items {
                encode_value(tables, schema, field, inner, item, out)?;
            }
        }
        (Kind::Named(name), Value::Record(record)) => {
            let nested = tables
                .by_name(name)
                .ok_or_else(|| RegistryError::UnregisteredType { name: name.clone() })?;
            encode_record(tables, nested, record, out)?;
        }
        _ => {
            return Err(mismatch(
                schema,
                format!(
                    "field `{field}` expects {kind}, found {}",
                    value.kind_name()
                ),
            ))
        }
    }
    Ok(())
}

fn read<T: DeserializeOwned>(input: &mut &[u8]) -> RegistryResult<T> {
    codec::decode_prefix(input).map_err(|e| RegistryError::Decode(e.to_string()))
}

/// Decode one record laid out by `schema` from the front of `input`.
pub(crate) fn decode_record(
    tables: &Tables,
    schema: &Schema,
    input: &mut &[u8],
) -> RegistryResult<Record> {
    let mut record = Record::new(schema.name.clone());
    for field in &schema.fields {
        let value = decode_value(tables, &field.kind, input)?;
        record.fields.push((field.name.clone(), value));
    }
    Ok(record)
}

fn decode_value(tables: &Tables, kind: &Kind, input: &mut &[u8]) -> RegistryResult<Value> {
    Ok(match kind {
        Kind::Bool => Value::Bool(read(input)?),
        Kind::Int => Value::Int(read(input)?),
        Kind::Uint => Value::Uint(read(input)?),
        Kind::Str => Value::Str(read(input)?),
        Kind::Bytes => Value::Bytes(read(input)?),
        Kind::Reference => Value::Reference(read(input)?),
        Kind::Dynamic => Value::Dynamic(read::<DynamicRef>(input)?),
        Kind::References => Value::References(read(input)?),
        Kind::List(inner) => {
            let len: u64 = read(input)?;
            // Caps the allocation at the remaining input.
            if len > input.len() as u64 {
                return Err(RegistryError::Decode(format!(
                    "list of {len} elements exceeds remaining {} bytes",
                    input.len()
                )));
            }
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(decode_value(tables, inner, input)?);
            }
            Value::List(items)
        }
        Kind::Named(name) => {
            let nested = tables
                .by_name(name)
                .ok_or_else(|| RegistryError::Decode(format!("unregistered embedded type {name}")))?;
            Value::Record(decode_record(tables, nested, input)?)
        }
    })
}
