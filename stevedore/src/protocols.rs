//! Protocol to worker-executable resolution.
//!
//! The engine does not know how to speak any protocol itself; it spawns a
//! worker process per protocol and this registry says which executable
//! that is. Resolution failure surfaces to jobs as
//! [`crate::error::JobError::UnsupportedProtocol`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

/// Mapping from protocol name to worker executable.
pub struct ProtocolRegistry {
    map: RwLock<HashMap<String, PathBuf>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_map(map: HashMap<String, PathBuf>) -> Self {
        Self {
            map: RwLock::new(
                map.into_iter()
                    .map(|(protocol, exec)| (protocol.to_ascii_lowercase(), exec))
                    .collect(),
            ),
        }
    }

    /// Registers (or replaces) the worker executable for a protocol.
    pub fn register(&self, protocol: impl Into<String>, executable: impl Into<PathBuf>) {
        let protocol = protocol.into().to_ascii_lowercase();
        let executable = executable.into();
        tracing::debug!(
            protocol = %protocol,
            executable = %executable.display(),
            "registered protocol worker"
        );
        self.map.write().insert(protocol, executable);
    }

    /// Registers a worker executable shipped next to the current binary.
    ///
    /// This is how the bundled `file` worker is found without any
    /// configuration.
    pub fn register_sibling(
        &self,
        protocol: impl Into<String>,
        executable_name: &str,
    ) -> std::io::Result<()> {
        let exe = std::env::current_exe()?;
        let dir = exe.parent().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "current executable has no parent directory",
            )
        })?;
        self.register(protocol, dir.join(executable_name));
        Ok(())
    }

    /// Resolves the worker executable for a protocol.
    pub fn resolve(&self, protocol: &str) -> Option<PathBuf> {
        self.map.read().get(protocol).cloned()
    }

    /// Returns true when a worker is registered for the protocol.
    pub fn supports(&self, protocol: &str) -> bool {
        self.map.read().contains_key(protocol)
    }

    /// All registered protocol names.
    pub fn protocols(&self) -> Vec<String> {
        self.map.read().keys().cloned().collect()
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}

/// Convenience for tests and embedders resolving a single known worker.
pub fn single_protocol(protocol: &str, executable: impl AsRef<Path>) -> ProtocolRegistry {
    let registry = ProtocolRegistry::new();
    registry.register(protocol, executable.as_ref());
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_unknown_protocol_is_none() {
        let registry = ProtocolRegistry::new();
        assert!(registry.resolve("gopher").is_none());
        assert!(!registry.supports("gopher"));
    }

    #[test]
    fn register_and_resolve() {
        let registry = ProtocolRegistry::new();
        registry.register("ftp", "/usr/libexec/ftp-worker");

        assert_eq!(
            registry.resolve("ftp"),
            Some(PathBuf::from("/usr/libexec/ftp-worker"))
        );
        assert!(registry.supports("ftp"));
    }

    #[test]
    fn protocol_names_are_lowercased() {
        let registry = ProtocolRegistry::new();
        registry.register("FTP", "/usr/libexec/ftp-worker");
        assert!(registry.supports("ftp"));
    }

    #[test]
    fn from_map_preserves_entries() {
        let mut map = HashMap::new();
        map.insert("http".to_string(), PathBuf::from("/w/http"));
        map.insert("FTP".to_string(), PathBuf::from("/w/ftp"));

        let registry = ProtocolRegistry::from_map(map);
        assert!(registry.supports("http"));
        assert!(registry.supports("ftp"));
        assert_eq!(registry.protocols().len(), 2);
    }

    #[test]
    fn single_protocol_helper() {
        let registry = single_protocol("file", "/w/file");
        assert_eq!(registry.resolve("file"), Some(PathBuf::from("/w/file")));
    }
}
