//! [`StateStore`] – the latest joint-angle values, shared between the
//! producer and every client session.
//!
//! The key set is fixed when the store is built. Writers replace the whole
//! value set in one step after validating it; readers receive an owned
//! [`StateSnapshot`]. The internal mutex is held only for the copy in or out,
//! never across socket I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anglestream_types::{Angles, StateSnapshot, StreamError};
use tracing::debug;

/// Thread-safe holder of the current angles for a fixed, ordered set of
/// joints.
///
/// # Example
///
/// ```
/// use anglestream_server::StateStore;
///
/// let store = StateStore::new(["right_shoulder", "right_elbow"]).unwrap();
/// store
///     .update([("right_shoulder", [10.0, 0.0, 0.0]), ("right_elbow", [0.0, 45.0, 0.0])])
///     .unwrap();
///
/// assert_eq!(store.read_snapshot().get("right_elbow"), Some([0.0, 45.0, 0.0]));
/// ```
#[derive(Debug)]
pub struct StateStore {
    keys: Arc<[String]>,
    index: HashMap<String, usize>,
    values: Mutex<Vec<Angles>>,
}

impl StateStore {
    /// Create a store for `joint_keys`, with every joint at `[0, 0, 0]`.
    ///
    /// The iteration order of `joint_keys` becomes the wire order.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Config`] when the list is empty, contains a
    /// duplicate, or contains a key that is empty or holds `,`, `:` or
    /// whitespace (those would break the line grammar).
    pub fn new<I, S>(joint_keys: I) -> Result<Self, StreamError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = joint_keys.into_iter().map(Into::into).collect();
        if keys.is_empty() {
            return Err(StreamError::Config("at least one joint key is required".to_string()));
        }

        let mut index = HashMap::with_capacity(keys.len());
        for (idx, key) in keys.iter().enumerate() {
            validate_key(key)?;
            if index.insert(key.clone(), idx).is_some() {
                return Err(StreamError::Config(format!("duplicate joint key '{key}'")));
            }
        }

        let values = vec![[0.0; 3]; keys.len()];
        Ok(Self {
            keys: keys.into(),
            index,
            values: Mutex::new(values),
        })
    }

    /// Joint keys in declaration order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Replace every joint's angles at once.
    ///
    /// `angles` must name each declared joint exactly once, each with exactly
    /// three finite components. Accepts anything that iterates `(key, values)`
    /// pairs: `&HashMap<String, Vec<f64>>`, `&BTreeMap<&str, [f64; 3]>`, an
    /// array of tuples, and so on.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Validation`] for an undeclared, duplicated or
    /// missing joint, a value that is not three components long, or a
    /// non-finite component. The stored state is left exactly as it was.
    pub fn update<I, K, V>(&self, angles: I) -> Result<(), StreamError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<[f64]>,
    {
        let mut staged: Vec<Option<Angles>> = vec![None; self.keys.len()];

        for (key, value) in angles {
            let key = key.as_ref();
            let idx = *self
                .index
                .get(key)
                .ok_or_else(|| StreamError::Validation(format!("unknown joint '{key}'")))?;

            let &[x, y, z] = value.as_ref() else {
                return Err(StreamError::Validation(format!(
                    "joint '{key}' must have exactly 3 values, got {}",
                    value.as_ref().len()
                )));
            };
            if ![x, y, z].iter().all(|c| c.is_finite()) {
                return Err(StreamError::Validation(format!(
                    "joint '{key}' has a non-finite value"
                )));
            }
            if staged[idx].replace([x, y, z]).is_some() {
                return Err(StreamError::Validation(format!("joint '{key}' supplied twice")));
            }
        }

        let values = staged
            .into_iter()
            .zip(self.keys.iter())
            .map(|(value, key)| {
                value.ok_or_else(|| StreamError::Validation(format!("missing joint '{key}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        *self.lock() = values;
        debug!(joints = self.keys.len(), "joint angles updated");
        Ok(())
    }

    /// Owned copy of the current state.
    pub fn read_snapshot(&self) -> StateSnapshot {
        let values = self.lock().clone();
        StateSnapshot::from_parts(Arc::clone(&self.keys), values)
    }

    // Every write replaces the whole vector, so a poisoned lock never guards
    // a half-applied update.
    fn lock(&self) -> MutexGuard<'_, Vec<Angles>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate_key(key: &str) -> Result<(), StreamError> {
    if key.is_empty() {
        return Err(StreamError::Config("joint keys must not be empty".to_string()));
    }
    if key.chars().any(|c| c == ',' || c == ':' || c.is_whitespace()) {
        return Err(StreamError::Config(format!(
            "joint key '{key}' must not contain ',', ':' or whitespace"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::thread;

    fn two_joint_store() -> StateStore {
        StateStore::new(["a", "b"]).unwrap()
    }

    #[test]
    fn starts_at_zero() {
        let snap = two_joint_store().read_snapshot();
        assert_eq!(snap.get("a"), Some([0.0, 0.0, 0.0]));
        assert_eq!(snap.get("b"), Some([0.0, 0.0, 0.0]));
    }

    #[test]
    fn valid_update_is_visible_in_next_snapshot() {
        let store = two_joint_store();
        let mut angles = HashMap::new();
        angles.insert("a".to_string(), vec![1.0, 2.0, 3.0]);
        angles.insert("b".to_string(), vec![4.0, 5.0, 6.0]);

        store.update(&angles).unwrap();

        let snap = store.read_snapshot();
        assert_eq!(snap.get("a"), Some([1.0, 2.0, 3.0]));
        assert_eq!(snap.get("b"), Some([4.0, 5.0, 6.0]));
    }

    #[test]
    fn snapshot_keeps_declaration_order_regardless_of_input_order() {
        let store = StateStore::new(["spine1", "right_hip", "left_hip"]).unwrap();
        let mut angles = BTreeMap::new();
        angles.insert("left_hip", [1.0, 0.0, 0.0]);
        angles.insert("right_hip", [-1.0, 0.0, 0.0]);
        angles.insert("spine1", [0.0, 5.0, 0.0]);
        store.update(&angles).unwrap();

        let snapshot = store.read_snapshot();
        let keys: Vec<&str> = snapshot.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["spine1", "right_hip", "left_hip"]);
    }

    #[test]
    fn missing_key_is_rejected_and_state_unchanged() {
        let store = two_joint_store();
        store.update([("a", [1.0, 1.0, 1.0]), ("b", [2.0, 2.0, 2.0])]).unwrap();
        let before = store.read_snapshot();

        let err = store.update([("a", [9.0, 9.0, 9.0])]).unwrap_err();
        assert!(matches!(err, StreamError::Validation(ref m) if m.contains("missing joint 'b'")));
        assert_eq!(store.read_snapshot(), before);
    }

    #[test]
    fn extra_key_is_rejected_and_state_unchanged() {
        let store = two_joint_store();
        let before = store.read_snapshot();

        let err = store
            .update([("a", [1.0, 1.0, 1.0]), ("b", [1.0, 1.0, 1.0]), ("c", [1.0, 1.0, 1.0])])
            .unwrap_err();
        assert!(matches!(err, StreamError::Validation(ref m) if m.contains("unknown joint 'c'")));
        assert_eq!(store.read_snapshot(), before);
    }

    #[test]
    fn wrong_arity_is_rejected_and_state_unchanged() {
        let store = two_joint_store();
        store.update([("a", [1.0, 1.0, 1.0]), ("b", [2.0, 2.0, 2.0])]).unwrap();
        let before = store.read_snapshot();

        let short: [(&str, Vec<f64>); 2] = [("a", vec![1.0, 2.0]), ("b", vec![1.0, 2.0, 3.0])];
        assert!(matches!(store.update(short), Err(StreamError::Validation(_))));

        let long: [(&str, Vec<f64>); 2] = [("a", vec![1.0, 2.0, 3.0]), ("b", vec![1.0, 2.0, 3.0, 4.0])];
        assert!(matches!(store.update(long), Err(StreamError::Validation(_))));

        assert_eq!(store.read_snapshot(), before);
    }

    #[test]
    fn non_finite_value_is_rejected() {
        let store = two_joint_store();
        let err = store
            .update([("a", [f64::NAN, 0.0, 0.0]), ("b", [0.0, 0.0, 0.0])])
            .unwrap_err();
        assert!(matches!(err, StreamError::Validation(_)));
        assert_eq!(store.read_snapshot().get("a"), Some([0.0, 0.0, 0.0]));
    }

    #[test]
    fn duplicate_key_in_update_is_rejected() {
        let store = two_joint_store();
        let err = store
            .update([("a", [1.0, 0.0, 0.0]), ("a", [2.0, 0.0, 0.0]), ("b", [0.0, 0.0, 0.0])])
            .unwrap_err();
        assert!(matches!(err, StreamError::Validation(ref m) if m.contains("twice")));
    }

    #[test]
    fn construction_rejects_bad_key_sets() {
        assert!(matches!(StateStore::new(Vec::<String>::new()), Err(StreamError::Config(_))));
        assert!(matches!(StateStore::new(["a", "a"]), Err(StreamError::Config(_))));
        assert!(matches!(StateStore::new(["a", ""]), Err(StreamError::Config(_))));
        assert!(matches!(StateStore::new(["left,hip"]), Err(StreamError::Config(_))));
        assert!(matches!(StateStore::new(["left:hip"]), Err(StreamError::Config(_))));
        assert!(matches!(StateStore::new(["left hip"]), Err(StreamError::Config(_))));
    }

    #[test]
    fn snapshot_is_independent_of_later_updates() {
        let store = two_joint_store();
        let snap = store.read_snapshot();
        store.update([("a", [7.0, 7.0, 7.0]), ("b", [8.0, 8.0, 8.0])]).unwrap();
        assert_eq!(snap.get("a"), Some([0.0, 0.0, 0.0]));
    }

    #[test]
    fn concurrent_writers_never_produce_a_mixed_snapshot() {
        let store = Arc::new(two_joint_store());

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..500 {
                        let v = (w * 1000 + i) as f64;
                        store.update([("a", [v, v, v]), ("b", [v, v, v])]).unwrap();
                    }
                })
            })
            .collect();

        for _ in 0..2000 {
            let snap = store.read_snapshot();
            // Every update writes the same value to both joints.
            assert_eq!(snap.get("a"), snap.get("b"));
        }

        for w in writers {
            w.join().unwrap();
        }
    }
}
