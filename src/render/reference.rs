//! Reference-counted GPU resources
//!
//! A resource map holds one [`Reference`] per distinct key. Registering a
//! node acquires one count per resource it uses; unregistering releases it.
//! The resource is created on the first acquire and deleted on the release
//! that brings the count back to zero.

use std::collections::hash_map::Entry;
use std::fmt::Debug;
use std::hash::Hash;

use rustc_hash::FxHashMap;

use crate::errors::{CanopyError, Result};

#[derive(Debug)]
pub struct Reference<T> {
    count: u32,
    resource: T,
}

impl<T> Reference<T> {
    /// Wraps a freshly created resource with a count of one.
    #[must_use]
    pub fn new(resource: T) -> Self {
        Self { count: 1, resource }
    }

    #[inline]
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    #[must_use]
    pub fn resource(&self) -> &T {
        &self.resource
    }

    #[inline]
    pub fn acquire(&mut self) {
        self.count += 1;
    }

    /// Decrements the count and returns the new value.
    ///
    /// `None` means the count was already zero and nothing changed.
    #[must_use = "a None release is a double free in the caller"]
    pub fn release(&mut self) -> Option<u32> {
        self.count = self.count.checked_sub(1)?;
        Some(self.count)
    }

    #[must_use]
    pub fn into_resource(self) -> T {
        self.resource
    }
}

pub type ReferenceMap<K, T> = FxHashMap<K, Reference<T>>;

/// Acquires `key`, creating its resource with `create` if it is not mapped yet.
///
/// Nothing is inserted when `create` fails.
pub fn create_reference<K, T, F>(map: &mut ReferenceMap<K, T>, key: K, create: F) -> Result<()>
where
    K: Eq + Hash,
    F: FnOnce(&K) -> Result<T>,
{
    match map.entry(key) {
        Entry::Occupied(mut entry) => entry.get_mut().acquire(),
        Entry::Vacant(entry) => {
            let resource = create(entry.key())?;
            entry.insert(Reference::new(resource));
        }
    }
    Ok(())
}

/// Releases `key`, handing its resource to `delete` when the count reaches zero.
///
/// Releasing a key that is not mapped means its count is already zero and
/// fails with [`CanopyError::NegativeReferenceCount`].
pub fn remove_reference<K, T, F>(
    map: &mut ReferenceMap<K, T>,
    kind: &'static str,
    key: &K,
    delete: F,
) -> Result<()>
where
    K: Eq + Hash + Debug,
    F: FnOnce(T),
{
    let negative = || CanopyError::NegativeReferenceCount {
        kind,
        key: format!("{key:?}"),
    };

    let reference = map.get_mut(key).ok_or_else(negative)?;
    match reference.release() {
        None => Err(negative()),
        Some(0) => {
            if let Some(reference) = map.remove(key) {
                delete(reference.into_resource());
            }
            Ok(())
        }
        Some(_) => Ok(()),
    }
}
