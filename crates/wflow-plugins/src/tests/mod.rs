//! Crate-level test support and BDD tests.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use wflow_plugin_protocol::messages::ManifestInfo;

use crate::client::{PluginClient, ProcessHandle};
use crate::discovery::{MANIFEST_FILE, PluginDirectoryEntry};
use crate::error::PluginError;
use crate::launcher::PluginLauncher;
use crate::manifest::PluginManifest;
use crate::stub::tests::MockPluginService;
use wflow_plugin_protocol::RpcError;


/// Writes `<root>/<name>/plugin.json` and a placeholder executable.
pub(crate) fn install_plugin(root: &Path, name: &str, version: &str) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).expect("create plugin dir");
    let manifest = serde_json::json!({
        "name": name,
        "version": version,
        "moduleTypes": [format!("{name}.module")],
        "stepTypes": [format!("{name}.step")],
    });
    fs::write(dir.join(MANIFEST_FILE), manifest.to_string()).expect("write manifest");
    fs::write(dir.join(name), "#!/bin/sh\n").expect("write executable");
}

/// Process stand-in counting terminations.
struct FakeProcess {
    pid: u32,
    kills: Arc<AtomicUsize>,
}

impl ProcessHandle for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn terminate(&mut self) {
        self.kills.fetch_add(1, Ordering::SeqCst);
    }
}

/// Launcher handing out mock-backed clients instead of processes.
#[derive(Default)]
pub(crate) struct StubLauncher {
    launches: AtomicUsize,
    kills: Arc<AtomicUsize>,
    next_pid: AtomicU32,
    failure: Mutex<Option<PluginError>>,
    manifest_unreachable: AtomicBool,
}

impl StubLauncher {
    /// Number of plugins started.
    pub(crate) fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Number of plugins killed.
    pub(crate) fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    /// Makes the next launch fail with `error`.
    pub(crate) fn fail_next(&self, error: PluginError) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Makes launched plugins fail their manifest call.
    pub(crate) fn break_manifest(&self) {
        self.manifest_unreachable.store(true, Ordering::SeqCst);
    }
}

impl PluginLauncher for StubLauncher {
    fn launch(
        &self,
        entry: &PluginDirectoryEntry,
        manifest: &PluginManifest,
    ) -> Result<PluginClient, PluginError> {
        if let Some(error) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(error);
        }
        self.launches.fetch_add(1, Ordering::SeqCst);

        let mut mock = MockPluginService::new();
        if self.manifest_unreachable.load(Ordering::SeqCst) {
            mock.expect_manifest().returning(|| Err(RpcError::Closed));
        } else {
            let info = ManifestInfo {
                name: manifest.name().to_owned(),
                version: manifest.version().to_owned(),
                author: manifest.author().to_owned(),
                description: manifest.description().to_owned(),
            };
            mock.expect_manifest().returning(move || Ok(info.clone()));
        }
        let process = FakeProcess {
            pid: 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
            kills: Arc::clone(&self.kills),
        };
        Ok(
            PluginClient::new(entry.name(), entry.directory(), Arc::new(mock))
                .with_process(Box::new(process)),
        )
    }
}
