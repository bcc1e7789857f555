//! Registry of live shells.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use remote_shell_core::{
    EngineConfig, ShellDeclaration, ShellError, ShellId, context::split_stream_names,
};
use tracing::{debug, warn};

use crate::{
    command::AcceptSender,
    shell::{Released, ShellInfo, ShellSession},
};

const DEFAULT_INPUT_STREAM: &str = "stdin";

/// All live shells, keyed by shell id.
///
/// The registry is also the [`CompletionSink`](remote_shell_core::CompletionSink)
/// backends report into.
pub struct Registry {
    shells: RwLock<HashMap<ShellId, Arc<ShellSession>>>,
    config: EngineConfig,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            shells: RwLock::new(HashMap::new()),
            config,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ShellId, Arc<ShellSession>>> {
        self.shells.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ShellId, Arc<ShellSession>>> {
        self.shells.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create and register a shell waiting for backend acceptance.
    ///
    /// # Errors
    /// Returns `InvalidParameter` if the declaration has no outbound streams
    /// and `ResourceExhausted` if the shell limit is reached.
    pub(crate) fn create(
        &self,
        declaration: &ShellDeclaration,
        accept: AcceptSender,
    ) -> Result<Arc<ShellSession>, ShellError> {
        let output_streams = declaration
            .output_streams
            .as_deref()
            .map(split_stream_names)
            .unwrap_or_default();
        if output_streams.is_empty() {
            return Err(ShellError::InvalidParameter(
                "shell declaration has no output streams".to_string(),
            ));
        }

        let input_streams = match declaration.input_streams.as_deref() {
            Some(streams) => split_stream_names(streams),
            None => vec![DEFAULT_INPUT_STREAM.to_string()],
        };

        let mut shells = self.write();
        if shells.len() >= self.config.max_shells {
            return Err(ShellError::ResourceExhausted(format!(
                "shell limit of {} reached",
                self.config.max_shells
            )));
        }

        let id = loop {
            let id = ShellId::generate();
            if !shells.contains_key(&id) {
                break id;
            }
        };

        let shell = Arc::new(ShellSession::new(
            id.clone(),
            output_streams,
            input_streams,
            declaration.is_compressed,
            accept,
        ));
        shells.insert(id, Arc::clone(&shell));

        debug!(
            shell_id = %shell.id(),
            streams = ?shell.output_streams(),
            compressed = shell.is_compressed(),
            "Registered shell"
        );
        Ok(shell)
    }

    /// Find a shell by id.
    #[must_use]
    pub fn find(&self, id: &ShellId) -> Option<Arc<ShellSession>> {
        self.read().get(id).cloned()
    }

    /// Unplumb a shell without reporting anything.
    pub(crate) fn remove(&self, id: &ShellId) -> Option<Arc<ShellSession>> {
        let shell = self.write().remove(id)?;
        shell.release();
        Some(shell)
    }

    /// Remove a shell and free everything it owns.
    ///
    /// Clients are expected to signal the command first; a command still
    /// attached is detached along with the shell and returned so the caller
    /// can tear it down in the backend.
    ///
    /// # Errors
    /// Returns `NotFound` if no shell has this id.
    pub(crate) fn delete(&self, id: &ShellId) -> Result<Released, ShellError> {
        let shell = self
            .write()
            .remove(id)
            .ok_or_else(|| ShellError::NotFound(format!("shell {id}")))?;

        let released = shell.release();
        if let Some(command) = &released.command {
            warn!(
                shell_id = %id,
                command_id = %command.id(),
                "Deleted shell with a command still attached"
            );
        }
        debug!(shell_id = %id, "Deleted shell");
        Ok(released)
    }

    /// Snapshot of all shells.
    #[must_use]
    pub fn list(&self) -> Vec<ShellInfo> {
        self.snapshot().iter().map(|shell| shell.info()).collect()
    }

    /// Report every shell to `report`, stopping at the first error.
    ///
    /// Returns the number of shells reported.
    ///
    /// # Errors
    /// Returns the first error produced by `report`.
    pub fn enumerate<F, E>(&self, mut report: F) -> Result<usize, E>
    where
        F: FnMut(ShellInfo) -> Result<(), E>,
    {
        let shells = self.snapshot();
        for shell in &shells {
            report(shell.info())?;
        }
        Ok(shells.len())
    }

    fn snapshot(&self) -> Vec<Arc<ShellSession>> {
        self.read().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove and free every shell, returning what each one left behind.
    pub(crate) fn clear(&self) -> Vec<(ShellId, Released)> {
        let shells: Vec<_> = self.write().drain().collect();
        shells
            .into_iter()
            .map(|(id, shell)| (id, shell.release()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;

    fn create(registry: &Registry, decl: &ShellDeclaration) -> Result<Arc<ShellSession>, ShellError> {
        let (tx, _rx) = oneshot::channel();
        registry.create(decl, tx)
    }

    #[test]
    fn test_create_parses_streams() {
        let registry = Registry::new(EngineConfig::default());
        let shell = create(&registry, &ShellDeclaration::new("stdout stderr")).unwrap();
        assert_eq!(shell.output_streams(), ["stdout", "stderr"]);
        assert_eq!(shell.input_streams(), ["stdin"]);
        assert!(!shell.is_compressed());
        assert!(registry.find(shell.id()).is_some());
    }

    #[test]
    fn test_create_requires_output_streams() {
        let registry = Registry::new(EngineConfig::default());
        assert!(matches!(
            create(&registry, &ShellDeclaration::default()),
            Err(ShellError::InvalidParameter(_))
        ));
        assert!(matches!(
            create(&registry, &ShellDeclaration::new("  ")),
            Err(ShellError::InvalidParameter(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_shell_limit() {
        let registry = Registry::new(EngineConfig { max_shells: 1 });
        create(&registry, &ShellDeclaration::new("stdout")).unwrap();
        assert!(matches!(
            create(&registry, &ShellDeclaration::new("stdout")),
            Err(ShellError::ResourceExhausted(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_delete() {
        let registry = Registry::new(EngineConfig::default());
        let shell = create(&registry, &ShellDeclaration::new("stdout")).unwrap();
        let id = shell.id().clone();

        let released = registry.delete(&id).unwrap();
        assert!(released.command.is_none());
        assert!(released.backend_handle.is_none());
        assert!(registry.find(&id).is_none());
        assert!(registry.list().is_empty());
        assert!(matches!(registry.delete(&id), Err(ShellError::NotFound(_))));
    }

    #[test]
    fn test_enumerate_stops_on_error() {
        let registry = Registry::new(EngineConfig::default());
        for _ in 0..3 {
            create(&registry, &ShellDeclaration::new("stdout")).unwrap();
        }

        let mut seen = 0;
        let result = registry.enumerate(|_| {
            seen += 1;
            if seen == 2 { Err("sink full") } else { Ok(()) }
        });
        assert_eq!(result, Err("sink full"));
        assert_eq!(seen, 2);

        assert_eq!(registry.enumerate(|_| Ok::<_, ()>(())), Ok(3));
    }

    #[test]
    fn test_clear() {
        let registry = Registry::new(EngineConfig::default());
        create(&registry, &ShellDeclaration::new("stdout")).unwrap();
        create(&registry, &ShellDeclaration::new("stdout")).unwrap();
        assert_eq!(registry.clear().len(), 2);
        assert!(registry.is_empty());
    }
}
