//! The type registry.
//!
//! [`Registry`] keeps an append-only table of schemas behind a `RwLock`, so
//! one registry can be shared by a container and every pack it opens.

use std::collections::HashMap;
use std::sync::RwLock;

use knot_store::{Batch, ContentStore, SCHEMA_TAG};
use knot_types::Hash;
use tracing::{debug, warn};

use crate::codec::{decode_record, encode_record};
use crate::error::{RegistryError, RegistryResult};
use crate::names::{validate_field_name, validate_type_name};
use crate::native::Native;
use crate::schema::{Field, Schema};
use crate::value::Record;

/// Registration table. Each name maps to exactly one field layout and each
/// layout to exactly one name.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    entries: Vec<(Hash, Schema)>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<Hash, usize>,
    by_fields: HashMap<Vec<Field>, usize>,
}

impl Tables {
    pub(crate) fn by_name(&self, name: &str) -> Option<&Schema> {
        self.by_name.get(name).map(|&i| &self.entries[i].1)
    }

    fn by_id(&self, id: &Hash) -> Option<&Schema> {
        self.by_id.get(id).map(|&i| &self.entries[i].1)
    }

    fn insert(&mut self, schema: Schema) -> RegistryResult<Hash> {
        validate_type_name(&schema.name)?;
        let mut seen = Vec::with_capacity(schema.fields.len());
        for field in &schema.fields {
            validate_field_name(&field.name)?;
            if seen.contains(&field.name.as_str()) {
                return Err(RegistryError::InvalidName {
                    name: field.name.clone(),
                    reason: format!("duplicate field in {}", schema.name),
                });
            }
            seen.push(field.name.as_str());
            for dep in field.kind.dependencies() {
                if !self.by_name.contains_key(dep) {
                    return Err(RegistryError::UnregisteredType {
                        name: dep.to_string(),
                    });
                }
            }
        }

        if self.by_name.contains_key(&schema.name) {
            return Err(RegistryError::DuplicateName { name: schema.name });
        }
        if let Some(&i) = self.by_fields.get(&schema.fields) {
            return Err(RegistryError::DuplicateType {
                name: schema.name,
                existing: self.entries[i].1.name.clone(),
            });
        }

        let id = schema.id()?;
        let index = self.entries.len();
        self.by_name.insert(schema.name.clone(), index);
        self.by_id.insert(id, index);
        self.by_fields.insert(schema.fields.clone(), index);
        self.entries.push((id, schema));
        Ok(id)
    }
}

/// Bidirectional mapping between type names and schemas, plus the codec
/// that turns [`Record`]s into payloads and back.
#[derive(Debug, Default)]
pub struct Registry {
    tables: RwLock<Tables>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RegistryResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|e| RegistryError::Poisoned(e.to_string()))
    }

    /// Register a type, returning its schema id.
    ///
    /// Fails with `DuplicateName` if the name is taken, `DuplicateType` if
    /// another name already has this exact field layout, `InvalidName` for
    /// malformed names, and `UnregisteredType` if a field embeds a type that
    /// is not registered yet.
    pub fn register(&self, name: impl Into<String>, fields: Vec<Field>) -> RegistryResult<Hash> {
        let schema = Schema::new(name, fields);
        let name = schema.name.clone();
        let id = self
            .tables
            .write()
            .map_err(|e| RegistryError::Poisoned(e.to_string()))?
            .insert(schema)?;
        debug!(name = %name, id = %id.short_hex(), "type registered");
        Ok(id)
    }

    /// Register a [`Native`] type under its own name.
    pub fn register_native<T: Native>(&self) -> RegistryResult<Hash> {
        self.register(T::NAME, T::fields())
    }

    /// Look up a schema by type name.
    pub fn schema(&self, name: &str) -> Option<Schema> {
        self.read().ok()?.by_name(name).cloned()
    }

    /// Look up a schema by id.
    pub fn schema_by_id(&self, id: &Hash) -> Option<Schema> {
        self.read().ok()?.by_id(id).cloned()
    }

    /// The schema id of a registered type name.
    pub fn schema_id(&self, name: &str) -> Option<Hash> {
        let tables = self.read().ok()?;
        tables.by_name.get(name).map(|&i| tables.entries[i].0)
    }

    /// Every registered schema with its id, in registration order.
    pub fn schemas(&self) -> Vec<(Hash, Schema)> {
        self.read().map(|t| t.entries.clone()).unwrap_or_default()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.read().map(|t| t.entries.len()).unwrap_or(0)
    }

    /// Returns `true` if no type is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode a record into `(schema id, payload)`.
    pub fn encode(&self, record: &Record) -> RegistryResult<(Hash, Vec<u8>)> {
        let tables = self.read()?;
        let index = *tables
            .by_name
            .get(&record.type_name)
            .ok_or_else(|| RegistryError::UnregisteredType {
                name: record.type_name.clone(),
            })?;
        let (id, schema) = &tables.entries[index];
        let mut out = Vec::new();
        encode_record(&tables, schema, record, &mut out)?;
        Ok((*id, out))
    }

    /// Decode a payload laid out by the schema `id`.
    ///
    /// The payload must be consumed exactly; trailing bytes are a `Decode`
    /// error.
    pub fn decode(&self, id: &Hash, bytes: &[u8]) -> RegistryResult<Record> {
        let tables = self.read()?;
        let schema = tables.by_id(id).ok_or(RegistryError::UnknownSchema(*id))?;
        let mut input = bytes;
        let record = decode_record(&tables, schema, &mut input)?;
        if !input.is_empty() {
            return Err(RegistryError::Decode(format!(
                "{} trailing bytes after {}",
                input.len(),
                schema.name
            )));
        }
        Ok(record)
    }

    /// Encode a native value.
    pub fn encode_native<T: Native>(&self, value: &T) -> RegistryResult<(Hash, Vec<u8>)> {
        self.encode(&value.to_record())
    }

    /// Decode a payload into a native value of type `T`.
    pub fn decode_native<T: Native>(&self, id: &Hash, bytes: &[u8]) -> RegistryResult<T> {
        let record = self.decode(id, bytes)?;
        if record.type_name != T::NAME {
            return Err(RegistryError::FieldMismatch {
                type_name: T::NAME.to_string(),
                reason: format!("payload is a {}", record.type_name),
            });
        }
        T::from_record(&record)
    }

    /// Persist every schema as a `SCHEMA_TAG` envelope, in one transaction.
    ///
    /// Returns the number of schemas in the catalogue.
    pub fn save(&self, store: &ContentStore) -> RegistryResult<usize> {
        let mut batch = Batch::new();
        let entries = self.schemas();
        for (_, schema) in &entries {
            let (key, bytes) = schema.envelope()?.encode_with_key()?;
            batch.object(key, bytes);
        }
        store.commit(&batch)?;
        debug!(schemas = entries.len(), "schema catalogue saved");
        Ok(entries.len())
    }

    /// Rebuild a registry from the catalogue stored in `store`.
    ///
    /// Corrupt or conflicting catalogue entries are logged and skipped.
    /// Schemas that embed other types are registered after their
    /// dependencies regardless of storage order.
    pub fn load(store: &ContentStore) -> RegistryResult<Self> {
        let registry = Self::new();
        let mut pending = Vec::new();
        for key in store.find_by_schema(&SCHEMA_TAG)? {
            let parsed = store
                .get(&key)
                .map_err(RegistryError::from)
                .and_then(|env| Schema::from_envelope(&env));
            match parsed {
                Ok(schema) => pending.push((key, schema)),
                Err(e) => warn!(key = %key.short_hex(), error = %e, "skipping corrupt schema"),
            }
        }

        loop {
            let before = pending.len();
            let mut deferred = Vec::new();
            for (key, schema) in pending {
                let ready = {
                    let tables = registry.read()?;
                    schema
                        .fields
                        .iter()
                        .flat_map(|f| f.kind.dependencies())
                        .all(|dep| tables.by_name.contains_key(dep))
                };
                if !ready {
                    deferred.push((key, schema));
                    continue;
                }
                let name = schema.name.clone();
                if let Err(e) = registry.register(schema.name, schema.fields) {
                    warn!(key = %key.short_hex(), name = %name, error = %e, "skipping schema");
                }
            }
            pending = deferred;
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }
        for (key, schema) in &pending {
            warn!(key = %key.short_hex(), name = %schema.name, "skipping schema with missing dependency");
        }

        debug!(schemas = registry.len(), "schema catalogue loaded");
        Ok(registry)
    }
}
