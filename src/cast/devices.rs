use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Names of receivers this process has started something on.
///
/// Every operation holds the lock for its whole duration, so a drain never
/// interleaves with an insert from a job finishing at the same moment.
#[derive(Debug, Default)]
pub struct DevicesInUse {
    names: Mutex<BTreeSet<String>>,
}

impl DevicesInUse {
    pub fn new() -> Self {
        Self::default()
    }

    fn names(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.names.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, name: &str) -> bool {
        self.names().insert(name.to_string())
    }

    pub fn remove(&self, name: &str) -> bool {
        self.names().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names().contains(name)
    }

    pub fn len(&self) -> usize {
        self.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.names().is_empty()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.names().iter().cloned().collect()
    }

    /// Empties the set and returns what it held.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.names()).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn drain_empties_the_set() {
        let devices = DevicesInUse::new();
        assert!(devices.insert("TV"));
        assert!(!devices.insert("TV"));
        devices.insert("Kitchen");
        assert_eq!(devices.drain(), vec!["Kitchen".to_string(), "TV".to_string()]);
        assert!(devices.is_empty());
        assert!(devices.drain().is_empty());
    }

    #[test]
    fn concurrent_inserts_and_drains_lose_nothing() {
        let devices = Arc::new(DevicesInUse::new());
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let devices = Arc::clone(&devices);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        devices.insert(&format!("dev-{}-{}", t, i));
                    }
                })
            })
            .collect();

        let mut drained = Vec::new();
        for _ in 0..50 {
            drained.extend(devices.drain());
        }
        for writer in writers {
            writer.join().unwrap();
        }
        drained.extend(devices.drain());

        drained.sort();
        drained.dedup();
        assert_eq!(drained.len(), 1000);
    }
}
