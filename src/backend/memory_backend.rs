use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use super::repo_backend::{
    BackendError, ObjectId, RepoBackend, Result, SwapResult, validate_ref_name,
};

/// An in-memory implementation of `RepoBackend`, intended primarily for testing.
pub struct MemoryBackend {
    objects: RwLock<HashMap<ObjectId, Vec<u8>>>,
    refs: RwLock<BTreeMap<String, String>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            refs: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.read().unwrap().len()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RepoBackend for MemoryBackend {
    async fn object_exists(&self, id: &ObjectId) -> Result<bool> {
        let objects = self.objects.read().unwrap();
        Ok(objects.contains_key(id))
    }

    async fn read_object(&self, id: &ObjectId) -> Result<Vec<u8>> {
        let objects = self.objects.read().unwrap();
        objects.get(id).cloned().ok_or(BackendError::NotFound)
    }

    async fn write_object(&self, id: &ObjectId, data: &[u8]) -> Result<()> {
        let mut objects = self.objects.write().unwrap();
        objects.insert(id.clone(), data.to_vec());
        Ok(())
    }

    async fn read_ref(&self, name: &str) -> Result<Option<String>> {
        validate_ref_name(name)?;
        let refs = self.refs.read().unwrap();
        Ok(refs.get(name).cloned())
    }

    async fn write_ref(&self, name: &str, value: &str) -> Result<()> {
        validate_ref_name(name)?;
        let mut refs = self.refs.write().unwrap();
        refs.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn swap_ref(
        &self,
        name: &str,
        expected: Option<&str>,
        new_value: Option<&str>,
    ) -> Result<SwapResult> {
        validate_ref_name(name)?;
        let mut refs = self.refs.write().unwrap();

        let current = refs.get(name).cloned();
        if current.as_deref() != expected {
            return Ok(SwapResult::Mismatch(current));
        }

        match new_value {
            Some(value) => {
                refs.insert(name.to_string(), value.to_string());
            }
            None => {
                refs.remove(name);
            }
        }
        Ok(SwapResult::Success)
    }

    async fn list_refs(&self, prefix: &str) -> Result<Vec<String>> {
        let refs = self.refs.read().unwrap();
        Ok(refs
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }
}
