//! A database recording function evaluations keyed by design vectors.
//!
//! The database guarantees each function is evaluated at most once per
//! design vector: the [`NormDbFunction`](crate::NormDbFunction) wrappers
//! look values up before calling the underlying function and store the
//! result right after. Entries keep their insertion order, which defines
//! the iteration history of a driver run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Prefix turning a function name into the name under which its gradient
/// is stored, e.g. `"f"` gives `"@f"`.
pub const GRAD_TAG: &str = "@";

/// A database key made of the exact bit patterns of a design vector.
///
/// Keying on `f64::to_bits` makes the mapping design vector to key
/// bijective, including around signed zeros, without any tolerance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DesignKey(Vec<u64>);

impl DesignKey {
    /// Build the key of a design vector.
    pub fn from_x(x: &ArrayView1<f64>) -> Self {
        DesignKey(x.iter().map(|v| v.to_bits()).collect())
    }

    /// Recover the design vector behind the key.
    pub fn to_x(&self) -> Array1<f64> {
        self.0.iter().map(|&bits| f64::from_bits(bits)).collect()
    }

    /// The dimension of the keyed design vector.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the keyed design vector has no component.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A value stored in the database for a given function and design vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FunctionValue {
    /// A scalar output, typically an objective value
    Scalar(f64),
    /// A vector output, typically a multi-valued constraint
    Vector(Array1<f64>),
    /// A matrix output, typically a gradient or Jacobian
    Matrix(Array2<f64>),
}

impl FunctionValue {
    /// The value as a scalar: a `Scalar` or a one-component `Vector`.
    pub fn scalar(&self) -> Option<f64> {
        match self {
            FunctionValue::Scalar(v) => Some(*v),
            FunctionValue::Vector(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    /// The value as a vector; a `Scalar` becomes a one-component vector.
    pub fn vector(&self) -> Option<Array1<f64>> {
        match self {
            FunctionValue::Scalar(v) => Some(Array1::from_elem(1, *v)),
            FunctionValue::Vector(v) => Some(v.clone()),
            FunctionValue::Matrix(_) => None,
        }
    }

    /// The value as a matrix view, if it is one.
    pub fn matrix(&self) -> Option<&Array2<f64>> {
        match self {
            FunctionValue::Matrix(m) => Some(m),
            _ => None,
        }
    }

    /// Whether any component is NaN.
    pub fn has_nan(&self) -> bool {
        match self {
            FunctionValue::Scalar(v) => v.is_nan(),
            FunctionValue::Vector(v) => v.iter().any(|c| c.is_nan()),
            FunctionValue::Matrix(m) => m.iter().any(|c| c.is_nan()),
        }
    }
}

impl From<f64> for FunctionValue {
    fn from(v: f64) -> Self {
        FunctionValue::Scalar(v)
    }
}

impl From<Array1<f64>> for FunctionValue {
    fn from(v: Array1<f64>) -> Self {
        if v.len() == 1 {
            FunctionValue::Scalar(v[0])
        } else {
            FunctionValue::Vector(v)
        }
    }
}

impl From<Array2<f64>> for FunctionValue {
    fn from(m: Array2<f64>) -> Self {
        FunctionValue::Matrix(m)
    }
}

/// The set of function values recorded at one design vector.
pub type FunctionRecord = HashMap<String, FunctionValue>;

/// An identifier returned when registering a database listener, used to
/// deregister it later.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerId(usize);

type Listener = Arc<dyn Fn(&Array1<f64>) + Send + Sync>;

#[derive(Default)]
struct DbStore {
    keys: Vec<DesignKey>,
    index: HashMap<DesignKey, usize>,
    records: Vec<FunctionRecord>,
}

#[derive(Default)]
struct ListenerSet {
    next_id: usize,
    new_iter: Vec<(usize, Listener)>,
    store: Vec<(usize, Listener)>,
}

/// The evaluation database of an optimization problem.
///
/// The database is internally synchronized: all methods take `&self` so it
/// can be shared behind an `Arc` between the problem, its function wrappers
/// and parallel DOE workers.
#[derive(Default)]
pub struct Database {
    store: Mutex<DbStore>,
    listeners: Mutex<ListenerSet>,
}

#[derive(Serialize, Deserialize)]
struct DbSnapshot {
    entries: Vec<(DesignKey, FunctionRecord)>,
}

impl Database {
    /// Create an empty database.
    pub fn new() -> Self {
        Database::default()
    }

    /// The name under which the gradient of `name` is stored.
    pub fn gradient_name(name: &str) -> String {
        format!("{GRAD_TAG}{name}")
    }

    /// Whether `name` refers to a stored gradient.
    pub fn is_gradient_name(name: &str) -> bool {
        name.starts_with(GRAD_TAG)
    }

    /// Store function values at a design vector, merging with any existing
    /// record, and return whether this made the entry non-empty for the
    /// first time.
    ///
    /// Storing an empty record registers the key (placeholder used to fix
    /// the submission order of parallel samples) without firing any
    /// listener. New-iteration listeners fire exactly once per design
    /// vector, on the store that first makes its record non-empty; store
    /// listeners fire on every non-empty store.
    pub fn store(&self, x: &ArrayView1<f64>, values: FunctionRecord) -> bool {
        let key = DesignKey::from_x(x);
        let new_point = {
            let mut store = self.store.lock().unwrap();
            let idx = match store.index.get(&key) {
                Some(&idx) => idx,
                None => {
                    let idx = store.keys.len();
                    store.keys.push(key.clone());
                    store.index.insert(key, idx);
                    store.records.push(FunctionRecord::new());
                    idx
                }
            };
            let was_empty = store.records[idx].is_empty();
            store.records[idx].extend(values.clone());
            was_empty && !values.is_empty()
        };
        // Listeners run outside the store lock so they may store themselves.
        if !values.is_empty() {
            let x_owned = x.to_owned();
            let (new_iter, stores) = {
                let listeners = self.listeners.lock().unwrap();
                (
                    listeners
                        .new_iter
                        .iter()
                        .map(|(_, l)| l.clone())
                        .collect::<Vec<_>>(),
                    listeners
                        .store
                        .iter()
                        .map(|(_, l)| l.clone())
                        .collect::<Vec<_>>(),
                )
            };
            if new_point {
                for listener in new_iter {
                    listener(&x_owned);
                }
            }
            for listener in stores {
                listener(&x_owned);
            }
        }
        new_point
    }

    /// The record stored at a design vector, if any.
    pub fn get(&self, x: &ArrayView1<f64>) -> Option<FunctionRecord> {
        self.get_record(&DesignKey::from_x(x))
    }

    /// The record stored at a key, if any.
    pub fn get_record(&self, key: &DesignKey) -> Option<FunctionRecord> {
        let store = self.store.lock().unwrap();
        store.index.get(key).map(|&idx| store.records[idx].clone())
    }

    /// The value of a function at a design vector, if recorded.
    pub fn get_function_value(
        &self,
        name: &str,
        x: &ArrayView1<f64>,
    ) -> Option<FunctionValue> {
        self.get_function_value_at_key(name, &DesignKey::from_x(x))
    }

    /// The value of a function at a key, if recorded.
    pub fn get_function_value_at_key(
        &self,
        name: &str,
        key: &DesignKey,
    ) -> Option<FunctionValue> {
        let store = self.store.lock().unwrap();
        store
            .index
            .get(key)
            .and_then(|&idx| store.records[idx].get(name).cloned())
    }

    /// Whether the key is registered with a non-empty record.
    pub fn contains_non_empty(&self, key: &DesignKey) -> bool {
        let store = self.store.lock().unwrap();
        store
            .index
            .get(key)
            .is_some_and(|&idx| !store.records[idx].is_empty())
    }

    /// The number of entries, placeholders included.
    pub fn n_entries(&self) -> usize {
        self.store.lock().unwrap().keys.len()
    }

    /// The number of entries holding at least one function value.
    pub fn n_non_empty_entries(&self) -> usize {
        let store = self.store.lock().unwrap();
        store.records.iter().filter(|r| !r.is_empty()).count()
    }

    /// Whether the database holds no entry at all.
    pub fn is_empty(&self) -> bool {
        self.store.lock().unwrap().keys.is_empty()
    }

    /// Drop the entries whose record is still empty, e.g. placeholders of
    /// parallel samples whose evaluation failed.
    pub fn remove_empty_entries(&self) {
        let mut store = self.store.lock().unwrap();
        let old_keys = std::mem::take(&mut store.keys);
        let old_records = std::mem::take(&mut store.records);
        let mut keys = Vec::with_capacity(old_keys.len());
        let mut records = Vec::with_capacity(old_records.len());
        for (key, record) in old_keys.into_iter().zip(old_records) {
            if !record.is_empty() {
                keys.push(key);
                records.push(record);
            }
        }
        store.index = keys
            .iter()
            .enumerate()
            .map(|(idx, key)| (key.clone(), idx))
            .collect();
        store.keys = keys;
        store.records = records;
    }

    /// A snapshot of all entries in insertion order.
    pub fn entries(&self) -> Vec<(Array1<f64>, FunctionRecord)> {
        let store = self.store.lock().unwrap();
        store
            .keys
            .iter()
            .zip(store.records.iter())
            .map(|(key, record)| (key.to_x(), record.clone()))
            .collect()
    }

    /// The `n` last design vectors with a non-empty record, oldest first.
    pub fn last_x_history(&self, n: usize) -> Vec<Array1<f64>> {
        let store = self.store.lock().unwrap();
        let mut history: Vec<Array1<f64>> = store
            .keys
            .iter()
            .zip(store.records.iter())
            .filter(|(_, record)| !record.is_empty())
            .rev()
            .take(n)
            .map(|(key, _)| key.to_x())
            .collect();
        history.reverse();
        history
    }

    /// The history of a function over the entries recording it, in
    /// insertion order.
    pub fn function_history(&self, name: &str) -> Vec<FunctionValue> {
        let store = self.store.lock().unwrap();
        store
            .records
            .iter()
            .filter_map(|record| record.get(name).cloned())
            .collect()
    }

    /// Remove all entries; listeners are kept.
    pub fn clear(&self) {
        let mut store = self.store.lock().unwrap();
        *store = DbStore::default();
    }

    /// Register a listener fired once per design vector, when its record
    /// first becomes non-empty.
    pub fn add_new_iter_listener(
        &self,
        listener: impl Fn(&Array1<f64>) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut listeners = self.listeners.lock().unwrap();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.new_iter.push((id, Arc::new(listener)));
        ListenerId(id)
    }

    /// Register a listener fired on every non-empty store.
    pub fn add_store_listener(
        &self,
        listener: impl Fn(&Array1<f64>) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut listeners = self.listeners.lock().unwrap();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.store.push((id, Arc::new(listener)));
        ListenerId(id)
    }

    /// Deregister a listener; returns whether it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let n_before = listeners.new_iter.len() + listeners.store.len();
        listeners.new_iter.retain(|(lid, _)| *lid != id.0);
        listeners.store.retain(|(lid, _)| *lid != id.0);
        n_before != listeners.new_iter.len() + listeners.store.len()
    }

    /// Export all entries as JSON, in insertion order.
    pub fn to_json(&self) -> Result<String> {
        let store = self.store.lock().unwrap();
        let snapshot = DbSnapshot {
            entries: store
                .keys
                .iter()
                .cloned()
                .zip(store.records.iter().cloned())
                .collect(),
        };
        Ok(serde_json::to_string(&snapshot)?)
    }

    /// Import a database exported with [`Database::to_json`].
    pub fn from_json(json: &str) -> Result<Database> {
        let snapshot: DbSnapshot = serde_json::from_str(json)?;
        let db = Database::new();
        {
            let mut store = db.store.lock().unwrap();
            for (key, record) in snapshot.entries {
                let idx = store.keys.len();
                store.index.insert(key.clone(), idx);
                store.keys.push(key);
                store.records.push(record);
            }
        }
        Ok(db)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("n_entries", &self.n_entries())
            .finish()
    }
}
