use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use knot_registry::{DynamicRef, Record, Registry};
use knot_types::Hash;

use crate::dynamic::Dynamic;
use crate::error::{PackError, PackResult};
use crate::reference::CollectionId;

/// An ordered collection of [`Dynamic`] references.
///
/// The collection owns position bookkeeping: after every structural change
/// each entry is re-attached at its current index, and removed entries come
/// back detached. With an index enabled it also keeps a map from object hash
/// to the first position holding it.
#[derive(Clone, Debug)]
pub struct References {
    id: CollectionId,
    items: Vec<Dynamic>,
    index: Option<HashMap<Hash, usize>>,
    modified: bool,
}

impl References {
    /// An empty collection. `indexed` enables the hash index.
    pub fn new(id: CollectionId, indexed: bool) -> Self {
        Self {
            id,
            items: Vec::new(),
            index: indexed.then(HashMap::new),
            modified: false,
        }
    }

    /// A collection over already-stored entries; not marked modified.
    pub(crate) fn from_items(id: CollectionId, indexed: bool, items: Vec<Dynamic>) -> Self {
        let mut refs = Self {
            id,
            items,
            index: indexed.then(HashMap::new),
            modified: false,
        };
        refs.reattach();
        refs
    }

    pub fn id(&self) -> CollectionId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Changed since the last save, structurally or through an entry.
    pub fn is_modified(&self) -> bool {
        self.modified || self.items.iter().any(Dynamic::is_dirty)
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Dynamic> {
        self.items.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, Dynamic> {
        self.items.iter_mut()
    }

    fn check(&self, index: usize) -> PackResult<()> {
        if index >= self.items.len() {
            return Err(PackError::IndexOutOfRange {
                index,
                len: self.items.len(),
            });
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> PackResult<&Dynamic> {
        self.check(index)?;
        Ok(&self.items[index])
    }

    /// Mutable access to entry `index`. The hash index follows any retarget
    /// once the returned guard is dropped.
    pub fn get_mut(&mut self, index: usize) -> PackResult<EntryMut<'_>> {
        self.check(index)?;
        Ok(EntryMut { refs: self, index })
    }

    /// Direct access for resolution, which never changes an entry's target.
    pub(crate) fn slot_mut(&mut self, index: usize) -> PackResult<&mut Dynamic> {
        self.check(index)?;
        Ok(&mut self.items[index])
    }

    /// Targets of every entry, in order.
    pub fn targets(&self) -> Vec<DynamicRef> {
        self.items.iter().map(Dynamic::target).collect()
    }

    /// Re-establish every entry's position and rebuild the hash index.
    pub fn reattach(&mut self) {
        let id = self.id;
        for (i, item) in self.items.iter_mut().enumerate() {
            item.attach(id, i);
        }
        self.reindex();
    }

    fn reindex(&mut self) {
        if let Some(index) = self.index.as_mut() {
            index.clear();
            for (i, item) in self.items.iter().enumerate() {
                index.entry(item.hash()).or_insert(i);
            }
        }
    }

    pub fn push(&mut self, item: Dynamic) {
        self.items.push(item);
        self.modified = true;
        self.reattach();
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = Dynamic>) {
        self.items.extend(items);
        self.modified = true;
        self.reattach();
    }

    /// Remove the last entry and return it detached.
    pub fn pop(&mut self) -> Option<Dynamic> {
        let mut item = self.items.pop()?;
        item.detach();
        self.modified = true;
        self.reattach();
        Some(item)
    }

    /// Insert at `index`, shifting later entries. `index == len` appends.
    pub fn insert(&mut self, index: usize, item: Dynamic) -> PackResult<()> {
        if index > self.items.len() {
            return Err(PackError::IndexOutOfRange {
                index,
                len: self.items.len(),
            });
        }
        self.items.insert(index, item);
        self.modified = true;
        self.reattach();
        Ok(())
    }

    /// Remove the entry at `index` and return it detached.
    pub fn remove(&mut self, index: usize) -> PackResult<Dynamic> {
        self.check(index)?;
        let mut item = self.items.remove(index);
        item.detach();
        self.modified = true;
        self.reattach();
        Ok(item)
    }

    /// Swap the entry at `index`, returning the old one detached.
    pub fn replace(&mut self, index: usize, item: Dynamic) -> PackResult<Dynamic> {
        self.check(index)?;
        let mut old = std::mem::replace(&mut self.items[index], item);
        old.detach();
        self.modified = true;
        self.reattach();
        Ok(old)
    }

    /// Replace the object referenced at `index`. See [`Dynamic::set_value`].
    pub fn set_value(&mut self, index: usize, registry: &Registry, record: Record) -> PackResult<()> {
        self.check(index)?;
        self.items[index].set_value(registry, record)?;
        self.modified = true;
        self.reattach();
        Ok(())
    }

    /// Position of the first entry pointing at `hash`.
    pub fn position_of(&self, hash: &Hash) -> Option<usize> {
        match &self.index {
            Some(index) => index.get(hash).copied(),
            None => self.items.iter().position(|d| d.hash() == *hash),
        }
    }

    pub(crate) fn mark_saved(&mut self) {
        self.modified = false;
        for item in &mut self.items {
            item.mark_saved();
        }
    }
}

/// A borrowed entry of a [`References`], returned by
/// [`References::get_mut`].
pub struct EntryMut<'a> {
    refs: &'a mut References,
    index: usize,
}

impl Deref for EntryMut<'_> {
    type Target = Dynamic;

    fn deref(&self) -> &Dynamic {
        &self.refs.items[self.index]
    }
}

impl DerefMut for EntryMut<'_> {
    fn deref_mut(&mut self) -> &mut Dynamic {
        &mut self.refs.items[self.index]
    }
}

impl Drop for EntryMut<'_> {
    fn drop(&mut self) {
        self.refs.reindex();
    }
}

impl PartialEq for References {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl Eq for References {}
