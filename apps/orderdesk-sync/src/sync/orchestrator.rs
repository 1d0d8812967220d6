//! Synchronization cycle
//!
//! One cycle reconciles the local configuration, the last-known server
//! state (the shadow) and the server's current revision:
//! 1. resolve the expected revision from the catalog
//! 2. refresh versioned artifacts
//! 3. fetch and merge when the server moved ahead
//! 4. commit shadow and local file together
//! 5. push local edits back under the next revision
//!
//! Failures abort the cycle and are only logged; the caller learns nothing
//! but whether a restart is needed. Cycles for one installation must not
//! overlap.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::document::{validate, ConfigDocument, Identity, VersionInfo};
use crate::error::{ErrorKind, Result, SyncError};
use crate::store::ConfigStore;
use crate::transport::{PauseSignal, ServerApi};
use crate::versions::{Artifact, VersionManager};

use super::merge;
use super::types::{
    find_record, CycleInput, CycleMode, CycleOutcome, SoftwareRecord, BASELINE_REVISION,
    CONFIG_RECORD, NO_REVISION,
};

/// Drives synchronization cycles for one installation
pub struct SyncOrchestrator {
    api: ServerApi,
    versions: VersionManager,
    store: Arc<ConfigStore>,
    /// Identity issued by the server but not yet recorded in a shadow
    registered: Mutex<Option<Identity>>,
}

impl SyncOrchestrator {
    pub fn new(api: ServerApi, versions: VersionManager, store: Arc<ConfigStore>) -> Self {
        Self {
            api,
            versions,
            store,
            registered: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Collect the current local snapshot, shadow and catalog
    pub async fn gather(&self, mode: CycleMode, pause: &PauseSignal) -> Result<CycleInput> {
        let (local, token) = self.store.snapshot();
        let shadow = self.store.load_shadow()?;
        let identity = shadow
            .as_ref()
            .and_then(ConfigDocument::identity)
            .or_else(|| self.registered.lock().clone());
        let catalog = self.api.catalog(identity.as_ref(), pause).await?;

        Ok(CycleInput {
            mode,
            local,
            token,
            shadow,
            identity,
            catalog,
        })
    }

    /// Run one cycle and report whether the host must restart
    ///
    /// Never fails: errors are classified and logged, and the restart flag
    /// computed before the failure is returned.
    pub async fn run_cycle(&self, input: CycleInput, pause: &PauseSignal) -> bool {
        let mode = input.mode;
        let mut restart = false;

        match self.sync(input, pause, &mut restart).await {
            Ok(outcome) => {
                tracing::debug!(
                    ?mode,
                    fetched = ?outcome.fetched,
                    pushed = ?outcome.pushed,
                    local_written = outcome.local_written,
                    conflicts = outcome.conflicts.len(),
                    "Sync cycle complete"
                );
            }
            Err(err) => match err.kind() {
                ErrorKind::Temporary => {
                    tracing::error!(?mode, error = %err, "Sync cycle failed, retrying next cycle");
                }
                ErrorKind::Structural => {
                    tracing::error!(?mode, error = %err, "Sync cycle aborted on inconsistent state");
                }
                ErrorKind::Interrupted => {
                    tracing::info!(?mode, "Sync cycle interrupted: {}", err);
                }
            },
        }

        restart
    }

    async fn sync(
        &self,
        input: CycleInput,
        pause: &PauseSignal,
        restart: &mut bool,
    ) -> Result<CycleOutcome> {
        let CycleInput {
            mode,
            local,
            token,
            shadow,
            identity,
            catalog,
        } = input;
        let mut outcome = CycleOutcome::default();

        let expected = expected_revision(&catalog)?;
        if expected.is_some() != shadow.is_some() {
            return Err(SyncError::Inconsistent(format!(
                "catalog revision {:?} but server shadow {}",
                expected,
                if shadow.is_some() { "present" } else { "absent" }
            )));
        }

        let identity = match &shadow {
            Some(shadow) => {
                let recorded = shadow.identity().ok_or_else(|| {
                    SyncError::Inconsistent("server shadow has no identity".to_string())
                })?;
                if identity.as_ref().is_some_and(|given| *given != recorded) {
                    return Err(SyncError::IdentityMismatch);
                }
                Some(recorded)
            }
            None => identity,
        };

        let mut candidate = local.clone();
        self.versions
            .refresh_dependents(&mut candidate.auto_update, &catalog, pause)
            .await?;
        self.refresh_application(mode, &mut candidate.auto_update.application, &catalog, pause)
            .await?;

        let mut fetched = None;
        if let (Some(shadow), Some(expected)) = (&shadow, expected) {
            let base = shadow_revision(shadow)?;
            if expected < base {
                return Err(SyncError::RevisionRegressed {
                    shadow: base,
                    expected,
                });
            }
            if expected > base {
                let doc = self.fetch(shadow, expected, pause).await?;
                outcome.fetched = doc.revision();
                fetched = Some(doc);
            }
        }

        let merged = match (&fetched, &shadow) {
            (Some(latest), Some(base)) => {
                let result = merge::merge(&candidate, base, latest)?;
                candidate = result.document;
                outcome.conflicts = result.conflicts;
                true
            }
            _ => false,
        };
        candidate.strip_identity();

        if merged || candidate != local {
            validate(&candidate)?;
            match &fetched {
                Some(latest) => {
                    let staged = self.store.begin_shadow_commit(latest)?;
                    self.store.submit_local(&candidate, token)?;
                    staged.finalize()?;
                }
                None => {
                    self.store.submit_local(&candidate, token)?;
                }
            }
            outcome.local_written = true;
        }

        let changed = merge::undistributed_changes(&candidate, &local);
        *restart = !changed.is_empty();
        if *restart {
            tracing::info!(fields = ?changed, "Configuration change requires restart");
        }

        let next = match fetched.as_ref().or(shadow.as_ref()) {
            None => Some(BASELINE_REVISION),
            Some(remote) => {
                if remote.clone().without_identity() == candidate {
                    None
                } else {
                    let revision = shadow_revision(remote)?;
                    let next = revision.checked_add(1).ok_or_else(|| {
                        SyncError::Inconsistent(format!("no revision after {}", revision))
                    })?;
                    Some(next)
                }
            }
        };

        if let Some(revision) = next {
            let identity = match identity {
                Some(identity) => identity,
                None => self.register(pause).await?,
            };
            self.push(&candidate, &identity, revision, pause).await?;
            outcome.pushed = Some(revision);
        }

        Ok(outcome)
    }

    async fn refresh_application(
        &self,
        mode: CycleMode,
        info: &mut VersionInfo,
        catalog: &[SoftwareRecord],
        pause: &PauseSignal,
    ) -> Result<()> {
        if let Some(record) = find_record(catalog, Artifact::Application.catalog_name()) {
            match mode {
                CycleMode::Startup => {
                    self.versions.update_application(info, record, pause).await?;
                }
                CycleMode::Periodic => {
                    if info.current_version.as_deref() != Some(record.version.as_str()) {
                        self.versions.preload_application(record, pause).await?;
                    }
                }
            }
        }
        self.versions.clean(Artifact::Application, info);
        Ok(())
    }

    async fn fetch(
        &self,
        shadow: &ConfigDocument,
        expected: u64,
        pause: &PauseSignal,
    ) -> Result<ConfigDocument> {
        let identity = shadow
            .identity()
            .ok_or_else(|| SyncError::Inconsistent("server shadow has no identity".to_string()))?;
        tracing::info!(expected, "Server configuration moved ahead, fetching");

        let doc = self.api.fetch_config(&identity, pause).await?;
        validate(&doc)?;
        if doc.identity().as_ref() != Some(&identity) {
            return Err(SyncError::IdentityMismatch);
        }
        let fetched = shadow_revision(&doc)?;
        if fetched < expected {
            return Err(SyncError::StaleFetch { fetched, expected });
        }
        Ok(doc)
    }

    async fn register(&self, pause: &PauseSignal) -> Result<Identity> {
        let issued = self.registered.lock().clone();
        if let Some(identity) = issued {
            return Ok(identity);
        }
        let identity = self.api.register(pause).await?;
        *self.registered.lock() = Some(identity.clone());
        Ok(identity)
    }

    /// Stage the stamped shadow, submit it, then publish the shadow
    async fn push(
        &self,
        candidate: &ConfigDocument,
        identity: &Identity,
        revision: u64,
        pause: &PauseSignal,
    ) -> Result<()> {
        let stamped = candidate.stamped(identity, revision);
        let staged = self.store.begin_shadow_commit(&stamped)?;

        // On failure `staged` is dropped and the old shadow stays in place.
        self.api.push_config(identity, revision, &stamped, pause).await?;
        staged.finalize()?;

        self.registered.lock().take();
        tracing::info!(revision, "Pushed local configuration");
        Ok(())
    }
}

/// Server revision named by the catalog, if one was assigned
pub fn expected_revision(catalog: &[SoftwareRecord]) -> Result<Option<u64>> {
    let Some(record) = find_record(catalog, CONFIG_RECORD) else {
        return Ok(None);
    };
    let version = record.version.trim();
    if version.is_empty() || version == NO_REVISION {
        return Ok(None);
    }
    version.parse().map(Some).map_err(|_| {
        SyncError::Inconsistent(format!("catalog revision {:?} is not a number", record.version))
    })
}

fn shadow_revision(doc: &ConfigDocument) -> Result<u64> {
    doc.revision()
        .ok_or_else(|| SyncError::Inconsistent("server document has no revision".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTransport, Reply};
    use crate::transport::api::{CONFIG_PATH, REGISTER_PATH, SOFTWARE_PATH};
    use crate::transport::{pause_pair, Method};
    use crate::versions::Checksum;
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        fake: Arc<FakeTransport>,
        store: Arc<ConfigStore>,
        orchestrator: SyncOrchestrator,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let fake = FakeTransport::new();
            let store = Arc::new(
                ConfigStore::open(dir.path().join("orderdesk.json"), dir.path().join("server.json"))
                    .unwrap(),
            );
            let versions = VersionManager::new(dir.path().join("versions"), fake.clone());
            let orchestrator = SyncOrchestrator::new(ServerApi::new(fake.clone()), versions, store.clone());
            Self {
                dir,
                fake,
                store,
                orchestrator,
            }
        }

        fn seed_shadow(&self, doc: &ConfigDocument) {
            self.store.begin_shadow_commit(doc).unwrap().finalize().unwrap();
        }

        fn edit_local(&self, edit: impl FnOnce(&mut ConfigDocument)) {
            let (mut doc, token) = self.store.snapshot();
            edit(&mut doc);
            self.store.submit_local(&doc, token).unwrap();
        }

        fn input(&self, mode: CycleMode, catalog: Vec<SoftwareRecord>) -> CycleInput {
            let (local, token) = self.store.snapshot();
            let shadow = self.store.load_shadow().unwrap();
            let identity = shadow.as_ref().and_then(ConfigDocument::identity);
            CycleInput {
                mode,
                local,
                token,
                shadow,
                identity,
                catalog,
            }
        }

        async fn cycle(&self, catalog: Vec<SoftwareRecord>) -> bool {
            let input = self.input(CycleMode::Periodic, catalog);
            self.orchestrator.run_cycle(input, &PauseSignal::never()).await
        }

        async fn try_cycle(&self, catalog: Vec<SoftwareRecord>) -> (bool, Result<CycleOutcome>) {
            let input = self.input(CycleMode::Periodic, catalog);
            let mut restart = false;
            let result = self
                .orchestrator
                .sync(input, &PauseSignal::never(), &mut restart)
                .await;
            (restart, result)
        }

        fn shadow(&self) -> Option<ConfigDocument> {
            self.store.load_shadow().unwrap()
        }

        /// Names and contents of every file in the work directory
        fn disk(&self) -> Vec<(PathBuf, Vec<u8>)> {
            let mut files: Vec<_> = fs::read_dir(self.dir.path())
                .unwrap()
                .map(|entry| entry.unwrap().path())
                .filter(|path| path.is_file())
                .map(|path| {
                    let bytes = fs::read(&path).unwrap();
                    (path, bytes)
                })
                .collect();
            files.sort();
            files
        }

        fn pushes(&self) -> Vec<String> {
            self.fake
                .requests_to(Method::Post, CONFIG_PATH)
                .iter()
                .filter_map(|r| r.param_value("revision").map(str::to_string))
                .collect()
        }
    }

    fn identity() -> Identity {
        Identity {
            instance_id: "inst-1".to_string(),
            passcode: "secret".to_string(),
        }
    }

    fn config_record(revision: &str) -> SoftwareRecord {
        SoftwareRecord {
            name: CONFIG_RECORD.to_string(),
            version: revision.to_string(),
            download_url: String::new(),
            size: 0,
            checksum: None,
        }
    }

    fn accept_pushes(fake: &FakeTransport) {
        fake.reply(Method::Post, CONFIG_PATH, Reply::Body(b"{}".to_vec()));
    }

    #[test]
    fn test_expected_revision() {
        assert_eq!(expected_revision(&[]).unwrap(), None);
        assert_eq!(expected_revision(&[config_record("-1")]).unwrap(), None);
        assert_eq!(expected_revision(&[config_record("")]).unwrap(), None);
        assert_eq!(expected_revision(&[config_record("12")]).unwrap(), Some(12));
        assert!(matches!(
            expected_revision(&[config_record("twelve")]),
            Err(SyncError::Inconsistent(_))
        ));
    }

    #[tokio::test]
    async fn test_first_registration_pushes_baseline() {
        let h = Harness::new();
        h.fake.reply_json(
            Method::Get,
            REGISTER_PATH,
            &json!({"instance": "inst-1", "passcode": "secret"}),
        );
        accept_pushes(&h.fake);

        let restart = h.cycle(vec![]).await;

        assert!(!restart);
        assert_eq!(h.pushes(), vec!["0".to_string()]);
        assert!(h.fake.requests_to(Method::Get, CONFIG_PATH).is_empty());

        let shadow = h.shadow().unwrap();
        assert_eq!(shadow.identity(), Some(identity()));
        assert_eq!(shadow.revision(), Some(BASELINE_REVISION));

        let (local, _) = h.store.snapshot();
        assert!(local.revision().is_none());
        assert!(local.has_no_identity());
        assert!(!h.store.local_path().exists());
    }

    #[tokio::test]
    async fn test_failed_first_push_reuses_issued_identity() {
        let h = Harness::new();
        h.fake.reply_json(
            Method::Get,
            REGISTER_PATH,
            &json!({"instance": "inst-1", "passcode": "secret"}),
        );
        h.fake.reply(Method::Post, CONFIG_PATH, Reply::Status(503, "busy".to_string()));
        accept_pushes(&h.fake);

        assert!(!h.cycle(vec![]).await);
        assert!(h.shadow().is_none());

        assert!(!h.cycle(vec![]).await);
        assert_eq!(h.fake.requests_to(Method::Get, REGISTER_PATH).len(), 1);
        assert_eq!(h.shadow().unwrap().identity(), Some(identity()));
    }

    #[tokio::test]
    async fn test_unchanged_server_skips_fetch() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));

        let restart = h.cycle(vec![config_record("5")]).await;

        assert!(!restart);
        assert!(h.fake.requests_to(Method::Get, CONFIG_PATH).is_empty());
        assert!(h.pushes().is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_server_pushes_local_edits() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));
        h.edit_local(|doc| doc.invoice.printer_name = "Front desk".to_string());
        accept_pushes(&h.fake);

        let restart = h.cycle(vec![config_record("5")]).await;

        assert!(!restart);
        assert!(h.fake.requests_to(Method::Get, CONFIG_PATH).is_empty());
        assert_eq!(h.pushes(), vec!["6".to_string()]);

        let push = &h.fake.requests_to(Method::Post, CONFIG_PATH)[0];
        assert_eq!(push.param_value("instance"), Some("inst-1"));
        assert_eq!(push.param_value("passcode"), Some("secret"));

        let shadow = h.shadow().unwrap();
        assert_eq!(shadow.revision(), Some(6));
        assert_eq!(shadow.invoice.printer_name, "Front desk");
    }

    #[tokio::test]
    async fn test_identity_mismatch_aborts_without_writes() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));
        let intruder = Identity {
            instance_id: "inst-2".to_string(),
            passcode: "secret".to_string(),
        };
        h.fake.reply_json(
            Method::Get,
            CONFIG_PATH,
            &ConfigDocument::default().stamped(&intruder, 7),
        );
        let before = h.disk();

        let (restart, result) = h.try_cycle(vec![config_record("7")]).await;

        assert!(!restart);
        assert!(matches!(result, Err(SyncError::IdentityMismatch)));
        assert_eq!(h.disk(), before);
        assert!(h.pushes().is_empty());
    }

    #[tokio::test]
    async fn test_server_ahead_merges_and_pushes() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));
        h.edit_local(|doc| doc.invoice.printer_name = "Front desk".to_string());

        let mut latest = ConfigDocument::default().stamped(&identity(), 7);
        latest.invoice.copies = 3;
        latest.network.listen_port = 9000;
        h.fake.reply_json(Method::Get, CONFIG_PATH, &latest);
        accept_pushes(&h.fake);

        let (restart, result) = h.try_cycle(vec![config_record("7")]).await;
        let outcome = result.unwrap();

        assert!(restart);
        assert_eq!(outcome.fetched, Some(7));
        assert!(outcome.local_written);
        assert_eq!(outcome.pushed, Some(8));

        let (local, _) = h.store.snapshot();
        assert_eq!(local.invoice.printer_name, "Front desk");
        assert_eq!(local.invoice.copies, 3);
        assert_eq!(local.network.listen_port, 9000);
        assert!(local.has_no_identity());

        let shadow = h.shadow().unwrap();
        assert_eq!(shadow.revision(), Some(8));
        assert_eq!(shadow.without_identity(), local);
    }

    #[tokio::test]
    async fn test_server_ahead_without_local_edits_adopts_fetched() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));

        let mut latest = ConfigDocument::default().stamped(&identity(), 9);
        latest.store.name = "Harbour Street".to_string();
        h.fake.reply_json(Method::Get, CONFIG_PATH, &latest);

        // The fetched revision may run ahead of the catalog.
        let (restart, result) = h.try_cycle(vec![config_record("7")]).await;
        let outcome = result.unwrap();

        assert!(!restart);
        assert_eq!(outcome.fetched, Some(9));
        assert_eq!(outcome.pushed, None);
        assert_eq!(h.shadow().unwrap(), latest);
        assert_eq!(h.store.snapshot().0.store.name, "Harbour Street");
    }

    #[tokio::test]
    async fn test_second_cycle_is_a_noop() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));
        h.edit_local(|doc| doc.burner.enabled = true);
        accept_pushes(&h.fake);

        h.cycle(vec![config_record("5")]).await;
        assert_eq!(h.pushes().len(), 1);
        let settled = h.disk();

        let restart = h.cycle(vec![config_record("6")]).await;

        assert!(!restart);
        assert_eq!(h.disk(), settled);
        assert_eq!(h.pushes().len(), 1);
        assert!(h.fake.requests_to(Method::Get, CONFIG_PATH).is_empty());
    }

    #[tokio::test]
    async fn test_stale_fetch_is_rejected() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));
        h.fake.reply_json(
            Method::Get,
            CONFIG_PATH,
            &ConfigDocument::default().stamped(&identity(), 6),
        );
        let before = h.disk();

        let (_, result) = h.try_cycle(vec![config_record("7")]).await;

        assert!(matches!(
            result,
            Err(SyncError::StaleFetch {
                fetched: 6,
                expected: 7
            })
        ));
        assert_eq!(h.disk(), before);
    }

    #[tokio::test]
    async fn test_revision_going_backwards_is_rejected() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));
        let before = h.disk();

        let (_, result) = h.try_cycle(vec![config_record("3")]).await;

        assert!(matches!(
            result,
            Err(SyncError::RevisionRegressed {
                shadow: 5,
                expected: 3
            })
        ));
        assert!(h.fake.requests_to(Method::Get, CONFIG_PATH).is_empty());
        assert_eq!(h.disk(), before);
    }

    #[tokio::test]
    async fn test_shadow_and_catalog_must_agree() {
        let h = Harness::new();
        let (_, result) = h.try_cycle(vec![config_record("4")]).await;
        assert!(matches!(result, Err(SyncError::Inconsistent(_))));

        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));
        let (_, result) = h.try_cycle(vec![config_record(NO_REVISION)]).await;
        assert!(matches!(result, Err(SyncError::Inconsistent(_))));
        assert!(h.fake.requests().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_fetched_document_is_rejected() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));

        let mut latest = ConfigDocument::default().stamped(&identity(), 6);
        latest.invoice.copies = 0;
        h.fake.reply_json(Method::Get, CONFIG_PATH, &latest);
        let before = h.disk();

        let (_, result) = h.try_cycle(vec![config_record("6")]).await;

        assert!(matches!(result, Err(SyncError::Validation(_))));
        assert_eq!(h.disk(), before);
    }

    #[tokio::test]
    async fn test_invalid_merge_result_is_not_committed() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));
        h.edit_local(|doc| doc.invoice.copies = 0);

        let mut latest = ConfigDocument::default().stamped(&identity(), 6);
        latest.store.name = "Harbour Street".to_string();
        h.fake.reply_json(Method::Get, CONFIG_PATH, &latest);
        accept_pushes(&h.fake);
        let before = h.disk();

        let (restart, result) = h.try_cycle(vec![config_record("6")]).await;

        assert!(!restart);
        assert!(matches!(result, Err(SyncError::Validation(_))));
        assert_eq!(h.fake.requests_to(Method::Get, CONFIG_PATH).len(), 1);
        assert_eq!(h.disk(), before);
        assert_eq!(h.shadow().unwrap().revision(), Some(5));
        assert!(h.pushes().is_empty());
    }

    #[tokio::test]
    async fn test_stale_snapshot_commits_neither_file() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));

        let mut latest = ConfigDocument::default().stamped(&identity(), 7);
        latest.invoice.copies = 3;
        h.fake.reply_json(Method::Get, CONFIG_PATH, &latest);
        accept_pushes(&h.fake);

        let input = h.input(CycleMode::Periodic, vec![config_record("7")]);
        // Another writer lands between gathering and committing.
        h.edit_local(|doc| doc.store.name = "Harbour Street".to_string());
        let before = h.disk();

        let mut restart = false;
        let result = h
            .orchestrator
            .sync(input, &PauseSignal::never(), &mut restart)
            .await;

        assert!(matches!(
            result,
            Err(SyncError::Store(crate::error::StoreError::StaleSnapshot))
        ));
        assert_eq!(h.disk(), before);
        assert_eq!(h.shadow().unwrap().revision(), Some(5));
        assert_eq!(h.store.snapshot().0.store.name, "Harbour Street");
        assert!(h.pushes().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_revision_counter_is_not_pushed() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), u64::MAX));
        h.edit_local(|doc| doc.invoice.printer_name = "Front desk".to_string());
        accept_pushes(&h.fake);
        let before = h.disk();

        let (_, result) = h.try_cycle(vec![config_record(&u64::MAX.to_string())]).await;

        assert!(matches!(result, Err(SyncError::Inconsistent(_))));
        assert!(h.pushes().is_empty());
        assert_eq!(h.disk(), before);
        assert_eq!(h.shadow().unwrap().revision(), Some(u64::MAX));
    }

    #[tokio::test]
    async fn test_failed_push_leaves_shadow_untouched() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));
        h.edit_local(|doc| doc.queue.retention_days = 60);
        h.fake.reply(
            Method::Post,
            CONFIG_PATH,
            Reply::Status(409, r#"{"error":{"code":"conflict","message":"revision taken"}}"#.to_string()),
        );
        let before = h.disk();

        let (restart, result) = h.try_cycle(vec![config_record("5")]).await;

        assert!(!restart);
        assert!(matches!(result, Err(SyncError::ServerRejected { ref code, .. }) if code == "conflict"));
        assert_eq!(h.disk(), before);
        assert_eq!(h.shadow().unwrap().revision(), Some(5));
    }

    #[tokio::test]
    async fn test_restart_flag_survives_later_failure() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));

        let mut latest = ConfigDocument::default().stamped(&identity(), 6);
        latest.queue.data_dir = "/var/spool/orderdesk".to_string();
        h.fake.reply_json(Method::Get, CONFIG_PATH, &latest);
        h.edit_local(|doc| doc.invoice.show_prices = false);
        h.fake.reply(Method::Post, CONFIG_PATH, Reply::Status(503, "down".to_string()));

        let restart = h.cycle(vec![config_record("6")]).await;

        assert!(restart);
        assert_eq!(h.store.snapshot().0.queue.data_dir, "/var/spool/orderdesk");
        assert_eq!(h.shadow().unwrap().revision(), Some(6));
    }

    #[tokio::test]
    async fn test_cancelled_cycle_changes_nothing() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));
        h.edit_local(|doc| doc.invoice.copies = 2);
        let before = h.disk();

        let (controller, signal) = pause_pair();
        controller.cancel();
        let input = h.input(CycleMode::Periodic, vec![config_record("5")]);
        let restart = h.orchestrator.run_cycle(input, &signal).await;

        assert!(!restart);
        assert_eq!(h.disk(), before);
    }

    fn app_record(version: &str, jar: &[u8]) -> SoftwareRecord {
        SoftwareRecord {
            name: "app".to_string(),
            version: version.to_string(),
            download_url: "https://cdn.example/app/".to_string(),
            size: jar.len() as u64,
            checksum: Some(Checksum::of_bytes(jar).to_catalog()),
        }
    }

    #[tokio::test]
    async fn test_startup_cycle_switches_application() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));
        let jar = vec![7u8; 512];
        h.fake.serve_file("https://cdn.example/app/3.2.0", jar.clone());
        accept_pushes(&h.fake);

        let input = h.input(
            CycleMode::Startup,
            vec![config_record("5"), app_record("3.2.0", &jar)],
        );
        let restart = h.orchestrator.run_cycle(input, &PauseSignal::never()).await;

        assert!(restart);
        let (local, _) = h.store.snapshot();
        assert_eq!(local.auto_update.application.current_version.as_deref(), Some("3.2.0"));
        assert_eq!(h.pushes(), vec!["6".to_string()]);
        assert!(h.dir.path().join("versions/orderdesk-3.2.0.jar").exists());
    }

    #[tokio::test]
    async fn test_periodic_cycle_only_preloads_application() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));
        let jar = vec![7u8; 512];
        h.fake.serve_file("https://cdn.example/app/3.2.0", jar.clone());

        let restart = h
            .cycle(vec![config_record("5"), app_record("3.2.0", &jar)])
            .await;

        assert!(!restart);
        let (local, _) = h.store.snapshot();
        assert!(local.auto_update.application.current_version.is_none());
        assert!(h.dir.path().join("versions/orderdesk-3.2.0.jar").exists());
        assert!(h.pushes().is_empty());
    }

    #[tokio::test]
    async fn test_gather_reads_store_and_catalog() {
        let h = Harness::new();
        h.seed_shadow(&ConfigDocument::default().stamped(&identity(), 5));
        h.fake.reply_json(Method::Get, SOFTWARE_PATH, &vec![config_record("5")]);

        let input = h
            .orchestrator
            .gather(CycleMode::Startup, &PauseSignal::never())
            .await
            .unwrap();

        assert_eq!(input.mode, CycleMode::Startup);
        assert_eq!(input.identity, Some(identity()));
        assert_eq!(input.catalog, vec![config_record("5")]);
        let catalog_request = &h.fake.requests_to(Method::Get, SOFTWARE_PATH)[0];
        assert_eq!(catalog_request.param_value("instance"), Some("inst-1"));
    }
}
