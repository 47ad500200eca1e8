use crate::error::{SharedError, SharedResult};
use pbx_core::prelude::ObjectRef;
use rustc_hash::FxHashMap;
use std::sync::Mutex;

struct Entry {
    object: ObjectRef,
    owner: Option<String>,
}

/// Description of a registry entry as returned to scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    pub name: String,
    pub owned: bool,
    pub persistent: bool,
}

/// Process-wide name → frozen, deep-copied object registry. Each write
/// deep-copies and freezes its argument; writes through an owning
/// engine-instance are tagged so a later teardown can remove them in bulk.
#[derive(Default)]
pub struct SharedObjectRegistry {
    entries: Mutex<FxHashMap<String, Entry>>,
}

impl SharedObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites any existing entry. `owner` is `None` for a persistent
    /// entry that survives every engine-instance teardown.
    pub fn set(&self, name: &str, object: &ObjectRef, owner: Option<&str>) -> SharedResult<()> {
        let copy = object.deep_copy().map_err(|_| SharedError::CyclicObject(name.to_string()))?;
        copy.freeze();
        self.entries
            .lock()
            .unwrap()
            .insert(name.to_string(), Entry { object: copy, owner: owner.map(str::to_string) });
        Ok(())
    }

    /// Like `set`, but fails if `name` is already present.
    pub fn create(&self, name: &str, object: &ObjectRef, owner: Option<&str>) -> SharedResult<()> {
        if self.entries.lock().unwrap().contains_key(name) {
            return Err(SharedError::AlreadyExists(name.to_string()));
        }
        self.set(name, object, owner)
    }

    pub fn clear(&self, name: &str) {
        self.entries.lock().unwrap().remove(name);
    }

    /// Removes every entry, or (if `only_mine` and `owner` is given) only
    /// entries owned by `owner`.
    pub fn clear_all(&self, only_mine: bool, owner: Option<&str>) {
        let mut guard = self.entries.lock().unwrap();
        match (only_mine, owner) {
            (true, Some(owner)) => guard.retain(|_, e| e.owner.as_deref() != Some(owner)),
            _ => guard.clear(),
        }
    }

    /// Removes every entry owned by `owner`, regardless of `only_mine` —
    /// the bulk-removal step run when an engine instance is torn down.
    pub fn remove_owned_by(&self, owner: &str) {
        self.entries.lock().unwrap().retain(|_, e| e.owner.as_deref() != Some(owner));
    }

    /// Returns a deep copy of the stored object, independent of the
    /// registry's own frozen copy.
    pub fn get(&self, name: &str) -> Option<ObjectRef> {
        let guard = self.entries.lock().unwrap();
        let entry = guard.get(name)?;
        entry.object.deep_copy().ok().or_else(|| Some(entry.object.clone()))
    }

    /// Returns the registry's own frozen copy directly, without copying —
    /// used when the caller has no context of its own to copy into.
    pub fn get_shared(&self, name: &str) -> Option<ObjectRef> {
        self.entries.lock().unwrap().get(name).map(|e| e.object.clone())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entries.lock().unwrap().contains_key(name)
    }

    pub fn description(&self, name: &str) -> Option<Description> {
        let guard = self.entries.lock().unwrap();
        let entry = guard.get(name)?;
        Some(Description {
            name: name.to_string(),
            owned: entry.owner.is_some(),
            persistent: entry.owner.is_none(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbx_core::prelude::{Object, Operation};

    #[test]
    fn set_freezes_a_deep_copy_independent_of_the_source() {
        let registry = SharedObjectRegistry::new();
        let source = Object::new(None, None);
        source.set_field("a", Operation::integer(1)).unwrap();
        registry.set("thing", &source, Some("engine1")).unwrap();

        source.set_field("a", Operation::integer(2)).unwrap();
        let stored = registry.get("thing").unwrap();
        assert_eq!(stored.get_field("a").unwrap().as_integer(), Some(1));
        assert!(stored.set_field("a", Operation::integer(9)).is_err());
    }

    #[test]
    fn create_fails_if_name_already_present() {
        let registry = SharedObjectRegistry::new();
        let obj = Object::new(None, None);
        registry.create("x", &obj, None).unwrap();
        assert!(registry.create("x", &obj, None).is_err());
    }

    #[test]
    fn set_rejects_cyclic_object_graphs() {
        let registry = SharedObjectRegistry::new();
        let a = Object::new(None, None);
        let b = Object::new(None, None);
        a.set_field("b", Operation::object(b.clone())).unwrap();
        b.set_field("a", Operation::object(a.clone())).unwrap();
        assert!(registry.set("cyclic", &a, None).is_err());
        assert!(!registry.exists("cyclic"));
    }

    #[test]
    fn remove_owned_by_only_removes_matching_entries() {
        let registry = SharedObjectRegistry::new();
        let obj = Object::new(None, None);
        registry.set("mine", &obj, Some("engine1")).unwrap();
        registry.set("persistent", &obj, None).unwrap();
        registry.set("other", &obj, Some("engine2")).unwrap();

        registry.remove_owned_by("engine1");
        assert!(!registry.exists("mine"));
        assert!(registry.exists("persistent"));
        assert!(registry.exists("other"));
    }

    #[test]
    fn clear_all_with_only_mine_preserves_others() {
        let registry = SharedObjectRegistry::new();
        let obj = Object::new(None, None);
        registry.set("mine", &obj, Some("engine1")).unwrap();
        registry.set("other", &obj, Some("engine2")).unwrap();
        registry.clear_all(true, Some("engine1"));
        assert!(!registry.exists("mine"));
        assert!(registry.exists("other"));
    }

    #[test]
    fn description_reports_ownership_and_persistence() {
        let registry = SharedObjectRegistry::new();
        let obj = Object::new(None, None);
        registry.set("owned", &obj, Some("engine1")).unwrap();
        registry.set("perm", &obj, None).unwrap();

        let owned = registry.description("owned").unwrap();
        assert!(owned.owned && !owned.persistent);
        let perm = registry.description("perm").unwrap();
        assert!(!perm.owned && perm.persistent);
    }
}
