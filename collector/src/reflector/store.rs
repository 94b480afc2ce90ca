use super::{
    Identity,
    WatchEvent,
};
use std::{
    collections::BTreeMap,
    sync::Arc,
};

/// Local mirror of one collection. Published to readers as an immutable
/// `Arc<Store<K>>`; only the owning reflector task mutates its working copy.
///
/// Cloning copies the key index, O(n) in the number of objects, but never
/// the objects themselves: a snapshot shares every `Arc<K>` with the working
/// copy it was taken from. The reflector clones once per listing and once per
/// coalesced watch burst.
#[derive(Debug)]
pub struct Store<K> {
    objects: BTreeMap<String, Arc<K>>,
    resource_version: String,
    synced: bool,
}

impl<K> Default for Store<K> {
    fn default() -> Self {
        Self {
            objects: BTreeMap::new(),
            resource_version: String::new(),
            synced: false,
        }
    }
}

impl<K> Clone for Store<K> {
    fn clone(&self) -> Self {
        Self {
            objects: self.objects.clone(),
            resource_version: self.resource_version.clone(),
            synced: self.synced,
        }
    }
}

impl<K: Identity> Store<K> {
    /// Replaces the whole content with a fresh listing. Marks the store as
    /// synced for good.
    pub fn replace(&mut self, items: impl IntoIterator<Item = K>, resource_version: String) {
        self.objects = items.into_iter().map(|obj| (obj.key(), Arc::new(obj))).collect();
        self.resource_version = resource_version;
        self.synced = true;
    }

    /// Upserts on add/modify, removes on delete. Deleting an unknown key is a
    /// no-op.
    pub fn apply(&mut self, event: WatchEvent<K>) {
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                self.advance(obj.resource_version());
                self.objects.insert(obj.key(), Arc::new(obj));
            }
            WatchEvent::Deleted(obj) => {
                self.advance(obj.resource_version());
                self.objects.remove(&obj.key());
            }
            WatchEvent::Bookmark(resource_version) => self.advance(Some(&resource_version)),
        }
    }

    fn advance(&mut self, resource_version: Option<&str>) {
        if let Some(rv) = resource_version.filter(|rv| !rv.is_empty()) {
            self.resource_version = rv.to_string();
        }
    }
}

impl<K> Store<K> {
    pub fn get(&self, key: &str) -> Option<&Arc<K>> {
        self.objects.get(key)
    }

    /// Objects ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<K>> {
        self.objects.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn resource_version(&self) -> &str {
        &self.resource_version
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }
}
