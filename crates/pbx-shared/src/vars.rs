use pbx_core::prelude::{extract_args, CoreError, CoreResult, Context, NativeObject, Object, ObjectRef, Operation};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};

/// One named bag of string variables, its own mutex so operations on
/// different bags never contend with each other.
#[derive(Default)]
struct Bag {
    values: Mutex<FxHashMap<String, String>>,
}

impl Bag {
    fn get(&self, name: &str) -> Option<String> {
        self.values.lock().unwrap().get(name).cloned()
    }

    fn set(&self, name: &str, value: String) {
        self.values.lock().unwrap().insert(name.to_string(), value);
    }

    fn create(&self, name: &str, value: &str) {
        let mut guard = self.values.lock().unwrap();
        guard.entry(name.to_string()).or_insert_with(|| value.to_string());
    }

    fn clear(&self, name: &str) {
        self.values.lock().unwrap().remove(name);
    }

    fn clear_all(&self) {
        self.values.lock().unwrap().clear();
    }

    fn exists(&self, name: &str) -> bool {
        self.values.lock().unwrap().contains_key(name)
    }

    fn step(&self, name: &str, delta: i64, modulus: i64) -> i64 {
        let mut guard = self.values.lock().unwrap();
        let entry = guard.entry(name.to_string()).or_insert_with(|| "0".to_string());
        let current: i64 = entry.parse().unwrap_or(0);
        let mut next = current + delta;
        if modulus != 0 {
            next = next.rem_euclid(modulus);
        }
        *entry = next.to_string();
        next
    }

    fn snapshot(&self, prefix: &str, strip_prefix: bool) -> Vec<(String, String)> {
        self.values
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| prefix.is_empty() || k.starts_with(prefix))
            .map(|(k, v)| {
                let key = if strip_prefix && !prefix.is_empty() {
                    k.strip_prefix(prefix).unwrap_or(k).to_string()
                } else {
                    k.clone()
                };
                (key, v.clone())
            })
            .collect()
    }
}

/// Process-wide keyed bags of string variables, named by the user. The
/// bag named `""` is the default, always present singleton; other names
/// are created on first use.
#[derive(Default)]
pub struct SharedVarsStore {
    bags: Mutex<FxHashMap<String, Arc<Bag>>>,
}

impl SharedVarsStore {
    pub fn new() -> Self {
        let mut bags = FxHashMap::default();
        bags.insert(String::new(), Arc::new(Bag::default()));
        Self { bags: Mutex::new(bags) }
    }

    fn bag(&self, name: &str) -> Arc<Bag> {
        let mut guard = self.bags.lock().unwrap();
        guard.entry(name.to_string()).or_insert_with(|| Arc::new(Bag::default())).clone()
    }

    pub fn get(&self, bag: &str, name: &str) -> Option<String> {
        self.bag(bag).get(name)
    }

    pub fn set(&self, bag: &str, name: &str, value: impl Into<String>) {
        self.bag(bag).set(name, value.into());
    }

    pub fn create(&self, bag: &str, name: &str, value: &str) {
        self.bag(bag).create(name, value);
    }

    pub fn clear(&self, bag: &str, name: &str) {
        self.bag(bag).clear(name);
    }

    pub fn clear_all(&self, bag: &str) {
        self.bag(bag).clear_all();
    }

    pub fn exists(&self, bag: &str, name: &str) -> bool {
        self.bag(bag).exists(name)
    }

    /// `mod == 0` means no modulus applied.
    pub fn inc(&self, bag: &str, name: &str, modulus: i64) -> i64 {
        self.bag(bag).step(name, 1, modulus)
    }

    pub fn dec(&self, bag: &str, name: &str, modulus: i64) -> i64 {
        self.bag(bag).step(name, -1, modulus)
    }

    pub fn add(&self, bag: &str, name: &str, amount: i64, modulus: i64) -> i64 {
        self.bag(bag).step(name, amount, modulus)
    }

    pub fn sub(&self, bag: &str, name: &str, amount: i64, modulus: i64) -> i64 {
        self.bag(bag).step(name, -amount, modulus)
    }

    /// Copies every variable matching `prefix` into a fresh object,
    /// optionally stripping the prefix from field names and auto-typing
    /// values that look like an integer or a boolean.
    pub fn get_vars(&self, bag: &str, prefix: &str, strip_prefix: bool, auto_type: bool) -> ObjectRef {
        let object = Object::new(None, None);
        for (key, value) in self.bag(bag).snapshot(prefix, strip_prefix) {
            let op = if auto_type { auto_typed(&value) } else { Operation::string(value) };
            object.set_field(&key, op).expect("freshly created object is never frozen");
        }
        object
    }
}

/// Native bridge surface for `SharedVars`: `bag` is always the first
/// argument (empty string selects the default bag), matching the
/// positional convention the engine's shared-variables object uses.
impl NativeObject for SharedVarsStore {
    fn call_native(&self, method: &str, args: Vec<Operation>, _context: &Context) -> CoreResult<Operation> {
        let as_str = |op: &Operation| op.as_str().map(|s| s.to_string()).unwrap_or_default();

        match method {
            "get" => {
                let args = extract_args(2, 2, args)?;
                let (bag, name) = (as_str(&args[0]), as_str(&args[1]));
                Ok(self.get(&bag, &name).map(Operation::string).unwrap_or_else(Operation::undefined))
            }
            "set" => {
                let args = extract_args(3, 3, args)?;
                self.set(&as_str(&args[0]), &as_str(&args[1]), as_str(&args[2]));
                Ok(Operation::undefined())
            }
            "create" => {
                let args = extract_args(3, 3, args)?;
                self.create(&as_str(&args[0]), &as_str(&args[1]), &as_str(&args[2]));
                Ok(Operation::undefined())
            }
            "clear" => {
                let args = extract_args(2, 2, args)?;
                self.clear(&as_str(&args[0]), &as_str(&args[1]));
                Ok(Operation::undefined())
            }
            "clearAll" => {
                let args = extract_args(1, 1, args)?;
                self.clear_all(&as_str(&args[0]));
                Ok(Operation::undefined())
            }
            "exists" => {
                let args = extract_args(2, 2, args)?;
                Ok(Operation::boolean(self.exists(&as_str(&args[0]), &as_str(&args[1]))))
            }
            "inc" | "dec" => {
                let args = extract_args(2, 3, args)?;
                let modulus = args.get(2).and_then(|op| op.as_integer()).unwrap_or(0);
                let value = if method == "inc" {
                    self.inc(&as_str(&args[0]), &as_str(&args[1]), modulus)
                } else {
                    self.dec(&as_str(&args[0]), &as_str(&args[1]), modulus)
                };
                Ok(Operation::integer(value))
            }
            "add" | "sub" => {
                let args = extract_args(3, 4, args)?;
                let amount = args[2].as_integer().unwrap_or(0);
                let modulus = args.get(3).and_then(|op| op.as_integer()).unwrap_or(0);
                let value = if method == "add" {
                    self.add(&as_str(&args[0]), &as_str(&args[1]), amount, modulus)
                } else {
                    self.sub(&as_str(&args[0]), &as_str(&args[1]), amount, modulus)
                };
                Ok(Operation::integer(value))
            }
            "getVars" => {
                let args = extract_args(1, 4, args)?;
                let prefix = args.get(1).map(as_str).unwrap_or_default();
                let strip_prefix = args.get(2).map(|op| op.as_bool().unwrap_or(false)).unwrap_or(false);
                let auto_type = args.get(3).map(|op| op.as_bool().unwrap_or(false)).unwrap_or(false);
                let object = self.get_vars(&as_str(&args[0]), &prefix, strip_prefix, auto_type);
                Ok(Operation::object(object))
            }
            other => Err(CoreError::UnknownNative(other.to_string())),
        }
    }
}

fn auto_typed(value: &str) -> Operation {
    if let Ok(i) = value.parse::<i64>() {
        return Operation::integer(i);
    }
    match value {
        "true" => Operation::boolean(true),
        "false" => Operation::boolean(false),
        _ => Operation::string(value),
    }
}
