use crate::error::{CoreError, CoreResult};
use crate::operation::Operation;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Live host-side parameters an object may mirror: reads fall through to
/// `get`, writes optionally fall through to `set` (used by the `Message`
/// bridge object to back a script property with a real message parameter
/// instead of a copied value).
pub trait NativeParams: Send + Sync {
    fn get(&self, name: &str) -> Option<Operation>;
    /// Returns `false` if this native parameter set refuses the write
    /// (e.g. the message is detached).
    fn set(&self, name: &str, value: Operation) -> bool;
}

/// A script object: a `String -> Operation` mapping plus a single-inheritance
/// prototype chain, a frozen flag, and an optional native-parameters bridge.
///
/// Prototype edges are only ever set at construction time from an
/// already-allocated, already-frozen prototype (see DESIGN.md "Prototype
/// chain as variant with shared ownership"), so the chain cannot cycle.
pub struct Object {
    own_props: Mutex<FxHashMap<String, Operation>>,
    proto: Option<ObjectRef>,
    frozen: AtomicBool,
    creation_line: Option<u32>,
    /// The serialising mutex of the context that created this object, if any.
    context_mutex: Option<Arc<Mutex<()>>>,
    native_params: Option<Arc<dyn NativeParams>>,
}

pub type ObjectRef = Arc<Object>;

impl Object {
    pub fn new(context_mutex: Option<Arc<Mutex<()>>>, creation_line: Option<u32>) -> ObjectRef {
        Arc::new(Object {
            own_props: Mutex::new(FxHashMap::default()),
            proto: None,
            frozen: AtomicBool::new(false),
            creation_line,
            context_mutex,
            native_params: None,
        })
    }

    pub fn with_proto(proto: ObjectRef, context_mutex: Option<Arc<Mutex<()>>>) -> ObjectRef {
        Arc::new(Object {
            own_props: Mutex::new(FxHashMap::default()),
            proto: Some(proto),
            frozen: AtomicBool::new(false),
            creation_line: None,
            context_mutex,
            native_params: None,
        })
    }

    pub fn with_native_params(
        native_params: Arc<dyn NativeParams>,
        context_mutex: Option<Arc<Mutex<()>>>,
    ) -> ObjectRef {
        Arc::new(Object {
            own_props: Mutex::new(FxHashMap::default()),
            proto: None,
            frozen: AtomicBool::new(false),
            creation_line: None,
            context_mutex,
            native_params: Some(native_params),
        })
    }

    pub fn creation_line(&self) -> Option<u32> {
        self.creation_line
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Freezing is one-way: once set, every future `set_field` fails.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn proto(&self) -> Option<&ObjectRef> {
        self.proto.as_ref()
    }

    /// Walks the prototype chain, own properties first.
    pub fn get_field(&self, name: &str) -> Option<Operation> {
        if let Some(np) = &self.native_params {
            if let Some(op) = np.get(name) {
                return Some(op);
            }
        }
        if let Some(op) = self.own_props.lock().unwrap().get(name).cloned() {
            return Some(op);
        }
        self.proto.as_ref().and_then(|p| p.get_field(name))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    /// Assigns `name = value`. Returns `Err(FrozenAssign)` if this object is
    /// frozen; the assignment operator in the script language is expected to
    /// translate that into its own "assignment failed, script keeps running"
    /// semantics.
    pub fn set_field(&self, name: &str, value: Operation) -> CoreResult<()> {
        if self.is_frozen() {
            return Err(CoreError::FrozenAssign);
        }
        if let Some(np) = &self.native_params {
            if np.set(name, value.clone()) {
                return Ok(());
            }
        }
        let mut props = self.own_props.lock().unwrap();
        if name == "length" {
            let new_len = value.as_integer().unwrap_or(0).max(0) as usize;
            truncate_array(&mut props, new_len);
            props.insert("length".to_string(), Operation::integer(new_len as i64));
            return Ok(());
        }
        if let Ok(idx) = name.parse::<usize>() {
            let current_len = props
                .get("length")
                .and_then(|op| op.as_integer())
                .unwrap_or(0) as usize;
            if idx + 1 > current_len {
                props.insert("length".to_string(), Operation::integer((idx + 1) as i64));
            }
        }
        props.insert(name.to_string(), value);
        Ok(())
    }

    pub fn delete_field(&self, name: &str) -> CoreResult<()> {
        if self.is_frozen() {
            return Err(CoreError::FrozenAssign);
        }
        self.own_props.lock().unwrap().remove(name);
        Ok(())
    }

    pub fn own_field_names(&self) -> Vec<String> {
        self.own_props.lock().unwrap().keys().cloned().collect()
    }

    pub fn length(&self) -> i64 {
        self.own_props
            .lock()
            .unwrap()
            .get("length")
            .and_then(|op| op.as_integer())
            .unwrap_or(0)
    }

    /// Deep-copies this object's own fields (and recursively nested objects),
    /// rejecting cyclic graphs. Used by `SharedObjects.set`.
    pub fn deep_copy(self: &ObjectRef) -> Result<ObjectRef, CycleDetected> {
        let mut visited = Vec::new();
        deep_copy_inner(self, &mut visited)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleDetected;

fn deep_copy_inner(
    obj: &ObjectRef,
    visited: &mut Vec<*const Object>,
) -> Result<ObjectRef, CycleDetected> {
    let ptr = Arc::as_ptr(obj);
    if visited.contains(&ptr) {
        return Err(CycleDetected);
    }
    visited.push(ptr);

    let copy = Object::new(None, obj.creation_line);
    for name in obj.own_field_names() {
        let Some(value) = obj.get_field(&name) else {
            continue;
        };
        let copied_value = match value.as_object() {
            Some(nested) => {
                let copied_nested = deep_copy_inner(nested, visited)?;
                Operation::object(copied_nested)
            }
            None => value,
        };
        // Writing through set_field before freezing: safe, copy isn't frozen yet.
        copy.set_field(&name, copied_value).expect("fresh copy is never frozen");
    }

    visited.pop();
    Ok(copy)
}

fn truncate_array(props: &mut FxHashMap<String, Operation>, new_len: usize) {
    let stale: Vec<String> = props
        .keys()
        .filter(|k| k.parse::<usize>().map(|i| i >= new_len).unwrap_or(false))
        .cloned()
        .collect();
    for key in stale {
        props.remove(&key);
    }
}
