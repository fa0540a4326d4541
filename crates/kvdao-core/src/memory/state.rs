//! Shared state behind the in-memory engine

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::key::{Key, KeyRange};
use crate::params::{IndexParameters, StoreParameters};

#[derive(Debug, Default)]
pub(crate) struct EngineState {
    pub(crate) databases: HashMap<String, Database>,
    next_generation: u64,
}

impl EngineState {
    /// Get the named database, creating an empty one at version 0.
    pub(crate) fn database_or_create(&mut self, name: &str) -> &mut Database {
        let next_generation = &mut self.next_generation;
        self.databases.entry(name.to_string()).or_insert_with(|| {
            *next_generation += 1;
            Database {
                generation: *next_generation,
                version: 0,
                stores: BTreeMap::new(),
                upgrading: false,
            }
        })
    }

    /// Get the database a connection was opened on.
    ///
    /// Fails once the database has been deleted, even if a new database with
    /// the same name has been created since.
    pub(crate) fn database(&mut self, name: &str, generation: u64) -> EngineResult<&mut Database> {
        match self.databases.get_mut(name) {
            Some(db) if db.generation == generation => Ok(db),
            _ => Err(EngineError::InvalidState(format!(
                "database '{}' has been deleted",
                name
            ))),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Database {
    pub(crate) generation: u64,
    pub(crate) version: u32,
    pub(crate) stores: BTreeMap<String, StoreData>,
    pub(crate) upgrading: bool,
}

impl Database {
    pub(crate) fn store(&self, name: &str) -> EngineResult<&StoreData> {
        self.stores
            .get(name)
            .ok_or_else(|| EngineError::NotFound(format!("object store '{}'", name)))
    }

    pub(crate) fn store_mut(&mut self, name: &str) -> EngineResult<&mut StoreData> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(format!("object store '{}'", name)))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct IndexData {
    pub(crate) key_path: String,
    pub(crate) params: IndexParameters,
    /// `(index key, primary key)` pairs in cursor order.
    pub(crate) entries: BTreeSet<(Key, Key)>,
}

impl IndexData {
    /// An index over `records`, populated from their current values.
    pub(crate) fn build(
        key_path: &str,
        params: &IndexParameters,
        records: &BTreeMap<Key, Value>,
    ) -> Self {
        let mut index = Self {
            key_path: key_path.to_string(),
            params: params.clone(),
            entries: BTreeSet::new(),
        };
        for (pk, value) in records {
            index.add_entries(pk, value);
        }
        index
    }

    /// Index keys produced by a record.
    pub(crate) fn keys_for(&self, value: &Value) -> Vec<Key> {
        let Some(raw) = lookup_path(value, &self.key_path) else {
            return Vec::new();
        };
        match raw {
            Value::Array(items) if self.params.multi_entry => {
                let mut keys: Vec<Key> = items.iter().filter_map(Key::from_value).collect();
                keys.sort();
                keys.dedup();
                keys
            }
            other => Key::from_value(other).into_iter().collect(),
        }
    }

    /// Primary keys of the records filed under `index_key`, in order.
    pub(crate) fn primary_keys<'a>(&'a self, index_key: &'a Key) -> impl Iterator<Item = &'a Key> {
        self.entries
            .range((Bound::Included((index_key.clone(), Key::MIN)), Bound::Unbounded))
            .take_while(move |(ik, _)| ik == index_key)
            .map(|(_, pk)| pk)
    }

    /// Whether two records share an index key.
    pub(crate) fn has_duplicates(&self) -> bool {
        self.entries
            .iter()
            .zip(self.entries.iter().skip(1))
            .any(|(a, b)| a.0 == b.0)
    }

    fn add_entries(&mut self, pk: &Key, value: &Value) {
        for ik in self.keys_for(value) {
            self.entries.insert((ik, pk.clone()));
        }
    }

    fn remove_entries(&mut self, pk: &Key, value: &Value) {
        for ik in self.keys_for(value) {
            self.entries.remove(&(ik, pk.clone()));
        }
    }
}

/// What a single record write replaced, enough to revert it.
#[derive(Debug)]
pub(crate) struct Change {
    pub(crate) key: Key,
    previous: Option<Value>,
    next_key: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct StoreData {
    pub(crate) params: StoreParameters,
    pub(crate) records: BTreeMap<Key, Value>,
    pub(crate) indexes: BTreeMap<String, IndexData>,
    next_key: i64,
}

impl StoreData {
    pub(crate) fn new(params: StoreParameters) -> Self {
        Self {
            params,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
            next_key: 1,
        }
    }

    pub(crate) fn index(&self, name: &str) -> EngineResult<&IndexData> {
        self.indexes
            .get(name)
            .ok_or_else(|| EngineError::NotFound(format!("index '{}'", name)))
    }

    /// Insert a record, generating or extracting its key as configured.
    pub(crate) fn write(
        &mut self,
        mut value: Value,
        key: Option<Key>,
        overwrite: bool,
    ) -> EngineResult<Change> {
        let key = self.resolve_key(&mut value, key)?;
        if !overwrite && self.records.contains_key(&key) {
            return Err(EngineError::Constraint(format!("key {} already exists", key)));
        }
        self.check_unique(&key, &value)?;
        let next_key = self.next_key;
        if let Key::Int(n) = key {
            if self.params.auto_increment && n >= self.next_key {
                self.next_key = n.saturating_add(1);
            }
        }
        let previous = self.insert_record(key.clone(), value);
        Ok(Change {
            key,
            previous,
            next_key,
        })
    }

    /// Remove a record and its index entries.
    pub(crate) fn remove(&mut self, key: &Key) -> Option<Change> {
        let previous = self.take_record(key)?;
        Some(Change {
            key: key.clone(),
            previous: Some(previous),
            next_key: self.next_key,
        })
    }

    /// Put back what `change` replaced.
    pub(crate) fn revert(&mut self, change: Change) {
        match change.previous {
            Some(value) => {
                self.insert_record(change.key, value);
            }
            None => {
                self.take_record(&change.key);
            }
        }
        self.next_key = change.next_key;
    }

    fn insert_record(&mut self, key: Key, value: Value) -> Option<Value> {
        let previous = self.take_record(&key);
        for index in self.indexes.values_mut() {
            index.add_entries(&key, &value);
        }
        self.records.insert(key, value);
        previous
    }

    fn take_record(&mut self, key: &Key) -> Option<Value> {
        let previous = self.records.remove(key)?;
        for index in self.indexes.values_mut() {
            index.remove_entries(key, &previous);
        }
        Some(previous)
    }

    fn resolve_key(&self, value: &mut Value, key: Option<Key>) -> EngineResult<Key> {
        match (&self.params.key_path, key) {
            (Some(_), Some(_)) => Err(EngineError::Data(
                "store uses inline keys; an explicit key is not allowed".into(),
            )),
            (Some(path), None) => {
                if let Some(raw) = lookup_path(value, path) {
                    return Key::from_value(raw).ok_or_else(|| {
                        EngineError::Data(format!("value at key path '{}' is not a valid key", path))
                    });
                }
                if !self.params.auto_increment {
                    return Err(EngineError::Data(format!(
                        "record has no value at key path '{}'",
                        path
                    )));
                }
                let key = Key::Int(self.next_key);
                inject_path(value, path, key.to_value())?;
                Ok(key)
            }
            (None, Some(key)) => Ok(key),
            (None, None) if self.params.auto_increment => Ok(Key::Int(self.next_key)),
            (None, None) => Err(EngineError::Data(
                "store has no key path and no key generator; a key is required".into(),
            )),
        }
    }

    fn check_unique(&self, key: &Key, value: &Value) -> EngineResult<()> {
        for (name, index) in self.indexes.iter().filter(|(_, i)| i.params.unique) {
            for index_key in index.keys_for(value) {
                if index.primary_keys(&index_key).any(|pk| pk != key) {
                    return Err(EngineError::Constraint(format!(
                        "unique index '{}' already contains {}",
                        name, index_key
                    )));
                }
            }
        }
        Ok(())
    }

    /// First record of the store in `range` strictly after `after`.
    pub(crate) fn seek_record(
        &self,
        range: Option<&KeyRange>,
        after: Option<&Key>,
    ) -> Option<(Key, Value)> {
        let start = match (after, range) {
            (Some(pk), _) => Bound::Excluded(pk.clone()),
            (None, Some(range)) => range.lower().cloned(),
            (None, None) => Bound::Unbounded,
        };
        for (pk, value) in self.records.range((start, Bound::Unbounded)) {
            match range {
                Some(range) if range.is_past(pk) => return None,
                Some(range) if !range.contains(pk) => continue,
                _ => return Some((pk.clone(), value.clone())),
            }
        }
        None
    }

    /// First index entry in `range` strictly after `after`.
    pub(crate) fn seek_index(
        &self,
        index: &IndexData,
        range: Option<&KeyRange>,
        after: Option<(&Key, &Key)>,
    ) -> Option<(Key, Key, Value)> {
        let start = match (after, range.map(KeyRange::lower)) {
            (Some((ik, pk)), _) => Bound::Excluded((ik.clone(), pk.clone())),
            (None, Some(Bound::Included(ik) | Bound::Excluded(ik))) => {
                Bound::Included((ik.clone(), Key::MIN))
            }
            (None, _) => Bound::Unbounded,
        };
        for (ik, pk) in index.entries.range((start, Bound::Unbounded)) {
            match range {
                Some(range) if range.is_past(ik) => return None,
                Some(range) if !range.contains(ik) => continue,
                _ => {
                    let value = self.records.get(pk).cloned()?;
                    return Some((ik.clone(), pk.clone(), value));
                }
            }
        }
        None
    }
}

/// Resolve a dotted key path inside a record. The empty path is the record itself.
pub(crate) fn lookup_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

fn inject_path(value: &mut Value, path: &str, key: Value) -> EngineResult<()> {
    let mut segments = path.split('.').peekable();
    let mut current = value;
    while let Some(segment) = segments.next() {
        let object = current.as_object_mut().ok_or_else(|| {
            EngineError::Data(format!("cannot store generated key at '{}'", path))
        })?;
        if segments.peek().is_none() {
            object.insert(segment.to_string(), key);
            return Ok(());
        }
        current = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    Err(EngineError::Data("empty key path cannot hold a generated key".into()))
}
