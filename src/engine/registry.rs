use std::collections::HashMap;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Resource names ↔ stable ids. Listing preserves registration order.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<ResourceInfo>,
    by_name: HashMap<String, ResourceId>,
    by_id: HashMap<ResourceId, usize>,
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("resource name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("resource name too long"));
    }
    Ok(())
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate `name` and reserve a fresh id for it. Nothing is stored
    /// until [`Registry::insert`].
    pub fn prepare(&self, name: &str) -> Result<ResourceInfo, EngineError> {
        validate_name(name)?;
        if self.by_name.contains_key(name) {
            return Err(EngineError::DuplicateResource(name.to_string()));
        }
        if self.entries.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        Ok(ResourceInfo {
            id: Ulid::new(),
            name: name.to_string(),
        })
    }

    /// Insert a prepared or loaded entry. Fails on a duplicate name or id.
    pub fn insert(&mut self, info: ResourceInfo) -> Result<(), EngineError> {
        if self.by_name.contains_key(&info.name) || self.by_id.contains_key(&info.id) {
            return Err(EngineError::DuplicateResource(info.name));
        }
        self.by_name.insert(info.name.clone(), info.id);
        self.by_id.insert(info.id, self.entries.len());
        self.entries.push(info);
        Ok(())
    }

    pub fn register(&mut self, name: &str) -> Result<ResourceId, EngineError> {
        let info = self.prepare(name)?;
        let id = info.id;
        self.insert(info)?;
        Ok(id)
    }

    /// Undo the most recent insert of `id`.
    pub(super) fn remove_last(&mut self, id: ResourceId) {
        if self.entries.last().is_some_and(|e| e.id == id)
            && let Some(info) = self.entries.pop()
        {
            self.by_name.remove(&info.name);
            self.by_id.remove(&info.id);
        }
    }

    pub fn resolve(&self, name: &str) -> Result<ResourceId, EngineError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::UnknownResource(name.to_string()))
    }

    pub fn name_of(&self, id: &ResourceId) -> Option<&str> {
        self.by_id.get(id).map(|&pos| self.entries[pos].name.as_str())
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Rename in place, returning the previous name.
    pub fn rename(&mut self, id: ResourceId, new_name: &str) -> Result<String, EngineError> {
        validate_name(new_name)?;
        let pos = *self
            .by_id
            .get(&id)
            .ok_or_else(|| EngineError::UnknownResource(id.to_string()))?;
        if self.entries[pos].name == new_name {
            return Ok(new_name.to_string());
        }
        if self.by_name.contains_key(new_name) {
            return Err(EngineError::DuplicateResource(new_name.to_string()));
        }
        let old = std::mem::replace(&mut self.entries[pos].name, new_name.to_string());
        self.by_name.remove(&old);
        self.by_name.insert(new_name.to_string(), id);
        Ok(old)
    }

    pub fn list(&self) -> Vec<ResourceInfo> {
        self.entries.clone()
    }

    pub fn ids(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.entries.iter().map(|e| e.id)
    }
}
