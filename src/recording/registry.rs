use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::AppError;
use crate::recording::Supervisor;
use crate::result::Result;

/// Process-global index of live supervisors by recording id. The map itself
/// never leaves this type; writers are exclusive, readers concurrent.
#[derive(Default)]
pub struct Registry {
    map: RwLock<HashMap<String, Arc<Supervisor>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly built supervisor. At most one per recording may
    /// ever exist.
    pub fn register(&self, id: &str, supervisor: Arc<Supervisor>) -> Result<()> {
        let mut map = self.map.write().unwrap();
        if map.contains_key(id) {
            return Err(AppError::conflict(format!(
                "recording {id} already has a supervisor"
            )));
        }
        map.insert(id.to_string(), supervisor);
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<Supervisor>> {
        self.map.read().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Supervisor>> {
        self.map.write().unwrap().remove(id)
    }

    pub fn all(&self) -> Vec<Arc<Supervisor>> {
        self.map.read().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().unwrap().is_empty()
    }
}
