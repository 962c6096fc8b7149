use async_trait::async_trait;

/// Object ID is a sha-256 hash represented as a lowercase hexadecimal string.
pub type ObjectId = String;

/// Error type for backend operations.
#[derive(Debug)]
pub enum BackendError {
    /// The object or reference was not found.
    NotFound,
    /// A reference name failed validation.
    InvalidRefName(String),
    /// A reference is locked by another writer.
    Locked(String),
    /// An I/O error occurred.
    Io(std::io::Error),
    /// A custom error message.
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotFound => write!(f, "not found"),
            BackendError::InvalidRefName(name) => write!(f, "invalid reference name '{}'", name),
            BackendError::Locked(name) => write!(f, "reference '{}' is locked", name),
            BackendError::Io(e) => write!(f, "I/O error: {}", e),
            BackendError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackendError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        BackendError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// The result of a compare-and-swap operation on a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapResult {
    /// The swap succeeded.
    Success,
    /// The swap failed because the reference did not hold the expected value.
    /// Contains the actual current value (if any).
    Mismatch(Option<String>),
}

/// Check that a reference name is a relative, slash-separated path of plain components.
pub fn validate_ref_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.split('/').all(|part| {
            !part.is_empty()
                && !part.starts_with('.')
                && !part.ends_with(".lock")
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        });
    if valid {
        Ok(())
    } else {
        Err(BackendError::InvalidRefName(name.to_string()))
    }
}

/// The storage interface for tabletree repositories.
///
/// Implementations store immutable objects (identified by their content hash)
/// and a small set of mutable named references such as `HEAD`, branch heads
/// and the suspended-merge pointer.
#[async_trait]
pub trait RepoBackend: Send + Sync {
    /// Check if an object with the given ID exists.
    async fn object_exists(&self, id: &ObjectId) -> Result<bool>;

    /// Read an object's contents by ID.
    ///
    /// Returns `BackendError::NotFound` if the object does not exist.
    async fn read_object(&self, id: &ObjectId) -> Result<Vec<u8>>;

    /// Write an object with the given ID and contents.
    ///
    /// It is optional for implementations to verify that the ID matches the
    /// sha-256 hash of the contents.
    async fn write_object(&self, id: &ObjectId, data: &[u8]) -> Result<()>;

    /// Read the value of a named reference, if it exists.
    async fn read_ref(&self, name: &str) -> Result<Option<String>>;

    /// Unconditionally set a named reference.
    async fn write_ref(&self, name: &str, value: &str) -> Result<()>;

    /// Atomically replace a reference if it holds the expected value.
    ///
    /// `expected == None` means the reference must not exist. `new_value == None`
    /// deletes the reference. No partially-written value is ever observable.
    async fn swap_ref(
        &self,
        name: &str,
        expected: Option<&str>,
        new_value: Option<&str>,
    ) -> Result<SwapResult>;

    /// List the names of all references starting with `prefix`, sorted.
    async fn list_refs(&self, prefix: &str) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ref_name() {
        assert!(validate_ref_name("HEAD").is_ok());
        assert!(validate_ref_name("refs/heads/main").is_ok());
        assert!(validate_ref_name("refs/heads/feature-1.2").is_ok());
        assert!(validate_ref_name("").is_err());
        assert!(validate_ref_name("/abs").is_err());
        assert!(validate_ref_name("refs/../escape").is_err());
        assert!(validate_ref_name("refs//double").is_err());
        assert!(validate_ref_name("refs/heads/main.lock").is_err());
        assert!(validate_ref_name("refs/heads/sp ace").is_err());
    }
}
