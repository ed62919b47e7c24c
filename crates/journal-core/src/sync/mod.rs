//! Backup and restore between the local store and the drive.
//!
//! A pass runs on its own task and reports [`SyncState`] transitions on a
//! channel. At most one pass runs at a time in the process, across every
//! orchestrator; asking for a second one while the first runs is a no-op.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::archive::{BackupArchive, NOTES_MIME_TYPE, NOTES_OBJECT_NAME};
use crate::drive::{DriveClient, RemoteFile};
use crate::error::{Error, Result};
use crate::media::{mime_type_for, MediaLibrary};
use crate::models::{Content, Note};
use crate::reconcile::NoteUpdate;
use crate::services::DatabaseService;
use crate::state::{ProgressReporter, SyncState};

/// How a backup treats media files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupOptions {
    /// Re-upload every media file. When false, files whose name already
    /// exists remotely are skipped.
    pub update_media_files: bool,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            update_media_files: true,
        }
    }
}

/// Host-side view of a running pass.
pub struct SyncHandle {
    events: UnboundedReceiver<SyncState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Next state, or `None` once the pass has finished and every state was
    /// received.
    pub async fn next_state(&mut self) -> Option<SyncState> {
        self.events.recv().await
    }

    /// Ask the pass to stop at its next network step.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain every remaining state until the pass ends.
    pub async fn wait(mut self) -> Vec<SyncState> {
        let mut states = Vec::new();
        while let Some(state) = self.events.recv().await {
            states.push(state);
        }
        if let Err(error) = self.task.await {
            tracing::error!("Sync task ended abnormally: {error}");
        }
        states
    }
}

static RUNNING: AtomicBool = AtomicBool::new(false);

/// Clears the process-wide running flag when the pass ends, however it ends.
struct RunningGuard;

impl RunningGuard {
    fn acquire() -> Option<Self> {
        RUNNING
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self)
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        RUNNING.store(false, Ordering::Release);
    }
}

pub struct SyncOrchestrator {
    db: DatabaseService,
    drive: Arc<DriveClient>,
    media: MediaLibrary,
}

impl SyncOrchestrator {
    pub fn new(db: DatabaseService, drive: Arc<DriveClient>, media: MediaLibrary) -> Self {
        Self {
            db,
            drive,
            media,
        }
    }

    /// Whether any pass is running in this process.
    pub fn is_running(&self) -> bool {
        RUNNING.load(Ordering::Acquire)
    }

    /// Mirror every local note and its media to the drive.
    ///
    /// Returns `None` when a pass is already running. Must be called from
    /// within a Tokio runtime.
    pub fn start_backup(&self, options: BackupOptions) -> Option<SyncHandle> {
        self.spawn(Job::Backup(options))
    }

    /// Import the drive's backup into the local store.
    ///
    /// Returns `None` when a pass is already running. Must be called from
    /// within a Tokio runtime.
    pub fn start_restore(&self) -> Option<SyncHandle> {
        self.spawn(Job::Restore)
    }

    fn spawn(&self, job: Job) -> Option<SyncHandle> {
        let Some(guard) = RunningGuard::acquire() else {
            tracing::info!("Ignoring {} request, a pass is already running", job.name());
            return None;
        };

        let (sender, events) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let pass = Pass {
            db: self.db.clone(),
            drive: Arc::clone(&self.drive),
            media: self.media.clone(),
            cancel: cancel.clone(),
        };

        let task = tokio::spawn(async move {
            let mut reporter = ProgressReporter::new(sender);
            let result = match job {
                Job::Backup(options) => pass.backup(options, &mut reporter).await,
                Job::Restore => pass.restore(&mut reporter).await,
            };

            match result {
                Ok(()) => {
                    tracing::info!("{} finished", job.name());
                    reporter.succeed();
                }
                Err(error) => {
                    tracing::warn!("{} failed: {error}", job.name());
                    reporter.fail(&error);
                }
            }
            drop(guard);
        });

        Some(SyncHandle {
            events,
            cancel,
            task,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Job {
    Backup(BackupOptions),
    Restore,
}

impl Job {
    const fn name(self) -> &'static str {
        match self {
            Self::Backup(_) => "Backup",
            Self::Restore => "Restore",
        }
    }
}

/// State shared by the steps of one pass.
struct Pass {
    db: DatabaseService,
    drive: Arc<DriveClient>,
    media: MediaLibrary,
    cancel: CancellationToken,
}

impl Pass {
    /// Run a network step unless the pass was cancelled first.
    async fn step<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            result = operation => result,
        }
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn backup(&self, options: BackupOptions, reporter: &mut ProgressReporter) -> Result<()> {
        tracing::info!(
            "Backup started (update media files: {})",
            options.update_media_files
        );
        let notes = self.db.list_notes().await?;
        reporter.set_total(notes.len());

        let remote = self.step(self.drive.list_all()).await?;
        let archive = BackupArchive::new(notes);
        let document = archive.render()?;
        let uploaded = self
            .step(
                self.drive
                    .upload_bytes(NOTES_OBJECT_NAME, NOTES_MIME_TYPE, &document),
            )
            .await?;
        let previous_archives: Vec<RemoteFile> = remote
            .iter()
            .filter(|file| file.name == NOTES_OBJECT_NAME && file.id != uploaded.id)
            .cloned()
            .collect();
        self.step(self.drive.delete_all(&previous_archives)).await?;

        let mut remote_by_name: HashMap<&str, Vec<&RemoteFile>> = HashMap::new();
        for file in &remote {
            remote_by_name.entry(file.name.as_str()).or_default().push(file);
        }

        let mut referenced = HashSet::new();
        for note in &archive.notes {
            self.ensure_not_cancelled()?;
            for (id, uri) in media_files(note) {
                referenced.insert(id.to_string());

                let existing = remote_by_name.get(id).map(Vec::as_slice).unwrap_or_default();
                if !options.update_media_files && !existing.is_empty() {
                    continue;
                }

                let path = Path::new(uri);
                if !tokio::fs::try_exists(path).await? {
                    tracing::warn!("Skipping {id}: local file {} is missing", path.display());
                    continue;
                }

                let uploaded = self
                    .step(self.drive.upload_file(path, id, &mime_type_for(id)))
                    .await?;
                let replaced: Vec<RemoteFile> = existing
                    .iter()
                    .filter(|file| file.id != uploaded.id)
                    .map(|file| (*file).clone())
                    .collect();
                self.step(self.drive.delete_all(&replaced)).await?;
            }
            reporter.advance();
        }

        let orphans: Vec<RemoteFile> = remote
            .iter()
            .filter(|file| file.name != NOTES_OBJECT_NAME && !referenced.contains(&file.name))
            .cloned()
            .collect();
        if !orphans.is_empty() {
            let pruned = self.step(self.drive.delete_all(&orphans)).await?;
            tracing::info!("Pruned {pruned} unreferenced remote files");
        }

        Ok(())
    }

    async fn restore(&self, reporter: &mut ProgressReporter) -> Result<()> {
        tracing::info!("Restore started");
        let remote = self.step(self.drive.list_all()).await?;

        let mut archives = remote.iter().filter(|file| file.name == NOTES_OBJECT_NAME);
        let Some(archive_file) = archives.next() else {
            return Err(Error::Remote {
                status: 404,
                message: format!("no {NOTES_OBJECT_NAME} backup found"),
            });
        };
        if archives.next().is_some() {
            tracing::warn!("Several {NOTES_OBJECT_NAME} copies found, using {}", archive_file.id);
        }

        let download = self.step(self.drive.download(&archive_file.id)).await?;
        let bytes = self.step(download.into_bytes()).await?;
        let notes = BackupArchive::parse(&bytes)?.notes;
        reporter.set_total(notes.len());

        let remote_by_name: HashMap<&str, &RemoteFile> = remote
            .iter()
            .map(|file| (file.name.as_str(), file))
            .collect();

        for mut note in notes {
            self.ensure_not_cancelled()?;
            for block in &mut note.content {
                match block {
                    Content::Media { media, .. } => {
                        for item in media.iter_mut() {
                            if let Some(uri) = self.fetch(item.id(), &remote_by_name).await? {
                                item.set_uri(uri);
                            }
                        }
                    }
                    Content::Voice(voice) => {
                        if let Some(uri) = self.fetch(&voice.id, &remote_by_name).await? {
                            voice.uri = uri;
                        }
                    }
                    Content::Title { .. } => {}
                }
            }

            let id = note.id.clone();
            self.db
                .reconcile_note(&id, NoteUpdate::from_note(note, true))
                .await?;
            reporter.advance();
        }

        Ok(())
    }

    /// Download one media file into the library. Returns the local path, or
    /// `None` when the drive has no such file.
    async fn fetch(
        &self,
        id: &str,
        remote_by_name: &HashMap<&str, &RemoteFile>,
    ) -> Result<Option<String>> {
        let target = self.media.path_for(id)?;
        let Some(file) = remote_by_name.get(id) else {
            tracing::warn!("Media {id} is missing from the drive, keeping the stored location");
            return Ok(None);
        };

        let local_size = match tokio::fs::metadata(&target).await {
            Ok(metadata) => Some(metadata.len()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => None,
            Err(error) => return Err(error.into()),
        };
        let up_to_date = local_size.is_some() && (file.size.is_none() || file.size == local_size);

        if !up_to_date {
            let download = self.step(self.drive.download(&file.id)).await?;
            let written = self.step(download.write_to_file(&target)).await?;
            tracing::debug!("Restored {id} ({written} bytes)");
        }
        Ok(Some(target.to_string_lossy().into_owned()))
    }
}

/// `(id, uri)` of every file a note references.
fn media_files(note: &Note) -> impl Iterator<Item = (&str, &str)> {
    note.media_items()
        .map(|item| (item.id(), item.uri()))
        .chain(
            note.voice_records()
                .map(|voice| (voice.id.as_str(), voice.uri.as_str())),
        )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::models::{ImageItem, Media, VoiceRecord};
    use crate::state::{FailureKind, SyncProgress};
    use crate::test_support;

    fn orchestrator(server: &MockServer, db: &DatabaseService, media_root: &Path) -> SyncOrchestrator {
        SyncOrchestrator::new(
            db.clone(),
            Arc::new(test_support::drive(server, "token")),
            MediaLibrary::new(media_root),
        )
    }

    fn listing(files: &[(&str, &str)]) -> serde_json::Value {
        let files: Vec<_> = files
            .iter()
            .map(|(id, name)| serde_json::json!({ "id": id, "name": name }))
            .collect();
        serde_json::json!({ "files": files })
    }

    async fn mount_listing(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_uploads(server: &MockServer, times: u64) {
        Mock::given(method("POST"))
            .and(path("/files"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "id": "uploaded", "name": "any" })),
            )
            .expect(times)
            .mount(server)
            .await;
    }

    async fn mount_delete(server: &MockServer, remote_id: &str, times: u64) {
        Mock::given(method("DELETE"))
            .and(path(format!("/files/{remote_id}")))
            .respond_with(ResponseTemplate::new(204))
            .expect(times)
            .mount(server)
            .await;
    }

    async fn mount_download(server: &MockServer, remote_id: &str, body: impl Into<Vec<u8>>) {
        Mock::given(method("GET"))
            .and(path(format!("/files/{remote_id}")))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.into()))
            .mount(server)
            .await;
    }

    fn image(id: &str, uri: &str) -> Media {
        Media::Image(ImageItem {
            id: id.to_string(),
            uri: uri.to_string(),
            ratio: 1.5,
            added_date: 1_700_000_000_000,
        })
    }

    fn note_with_media(items: Vec<Media>) -> Note {
        let mut note = Note::new();
        note.content = vec![
            Content::Title {
                id: "title".to_string(),
                text: "Harbour walk".to_string(),
            },
            Content::Media {
                id: "block".to_string(),
                media: items,
            },
        ];
        note
    }

    async fn store(db: &DatabaseService, note: Note) {
        let id = note.id.clone();
        db.reconcile_note(&id, NoteUpdate::from_note(note, true))
            .await
            .unwrap();
    }

    /// Write a local media file and return its path.
    fn local_file(dir: &Path, name: &str) -> String {
        let file = dir.join(name);
        std::fs::write(&file, b"pixels").unwrap();
        file.to_string_lossy().into_owned()
    }

    fn running(synced_notes: usize, total_notes: usize) -> SyncState {
        SyncState::Running {
            progress: SyncProgress {
                synced_notes,
                total_notes,
            },
        }
    }

    fn failure_kind(states: &[SyncState]) -> FailureKind {
        match states.last() {
            Some(SyncState::Failure(failure)) => failure.kind,
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn backup_uploads_archive_and_media_with_progress() {
        let _pass = test_support::exclusive_pass().await;
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseService::open_in_memory().await.unwrap();
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            let uri = local_file(dir.path(), name);
            store(&db, note_with_media(vec![image(name, &uri)])).await;
        }

        mount_listing(&server, listing(&[])).await;
        mount_uploads(&server, 4).await;

        let sync = orchestrator(&server, &db, &dir.path().join("media"));
        let states = sync
            .start_backup(BackupOptions::default())
            .unwrap()
            .wait()
            .await;

        assert_eq!(
            states,
            vec![running(1, 3), running(2, 3), running(3, 3), SyncState::Success]
        );
        assert!(!sync.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn metadata_only_backup_skips_existing_media_and_prunes_orphans() {
        let _pass = test_support::exclusive_pass().await;
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseService::open_in_memory().await.unwrap();
        let a = local_file(dir.path(), "a.jpg");
        let b = local_file(dir.path(), "b.jpg");
        store(&db, note_with_media(vec![image("a.jpg", &a), image("b.jpg", &b)])).await;

        mount_listing(
            &server,
            listing(&[
                ("r-notes", NOTES_OBJECT_NAME),
                ("r-a", "a.jpg"),
                ("r-stale", "stale.jpg"),
            ]),
        )
        .await;
        mount_uploads(&server, 2).await;
        mount_delete(&server, "r-notes", 1).await;
        mount_delete(&server, "r-stale", 1).await;
        mount_delete(&server, "r-a", 0).await;

        let sync = orchestrator(&server, &db, &dir.path().join("media"));
        let states = sync
            .start_backup(BackupOptions {
                update_media_files: false,
            })
            .unwrap()
            .wait()
            .await;

        assert_eq!(states, vec![running(1, 1), SyncState::Success]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn backup_skips_missing_local_files() {
        let _pass = test_support::exclusive_pass().await;
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseService::open_in_memory().await.unwrap();
        store(&db, note_with_media(vec![image("gone.jpg", "/nowhere/gone.jpg")])).await;

        mount_listing(&server, listing(&[])).await;
        mount_uploads(&server, 1).await;

        let sync = orchestrator(&server, &db, dir.path());
        let states = sync
            .start_backup(BackupOptions::default())
            .unwrap()
            .wait()
            .await;

        assert_eq!(states.last(), Some(&SyncState::Success));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_downloads_media_and_rewrites_locations() {
        let _pass = test_support::exclusive_pass().await;
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let media_root = dir.path().join("media");
        let db = DatabaseService::open_in_memory().await.unwrap();

        let mut note = note_with_media(vec![image("0191.jpg", "/old/device/0191.jpg")]);
        note.content.push(Content::Voice(VoiceRecord {
            id: "0192.wav".to_string(),
            uri: "/old/device/0192.wav".to_string(),
            duration_ms: 1_500,
            volume_samples: vec![0.5, 1.0],
        }));
        let document = BackupArchive::new(vec![note.clone()]).render().unwrap();

        mount_listing(
            &server,
            serde_json::json!({ "files": [
                { "id": "r-notes", "name": NOTES_OBJECT_NAME },
                { "id": "r-img", "name": "0191.jpg", "size": "5" },
                { "id": "r-voice", "name": "0192.wav" },
            ]}),
        )
        .await;
        mount_download(&server, "r-notes", document).await;
        mount_download(&server, "r-img", b"hello".to_vec()).await;
        mount_download(&server, "r-voice", b"RIFF".to_vec()).await;

        let sync = orchestrator(&server, &db, &media_root);
        let states = sync.start_restore().unwrap().wait().await;
        assert_eq!(states, vec![running(1, 1), SyncState::Success]);

        let restored = db.get_note(&note.id).await.unwrap().unwrap();
        let image_path = media_root.join("0191.jpg");
        let voice_path = media_root.join("0192.wav");
        let uris: Vec<&str> = restored.media_items().map(Media::uri).collect();
        assert_eq!(uris, vec![image_path.to_str().unwrap()]);
        let voice = restored.voice_records().next().unwrap();
        assert_eq!(voice.uri, voice_path.to_str().unwrap());
        assert_eq!(std::fs::read(&image_path).unwrap(), b"hello");
        assert_eq!(std::fs::read(&voice_path).unwrap(), b"RIFF");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_keeps_location_of_media_missing_remotely() {
        let _pass = test_support::exclusive_pass().await;
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseService::open_in_memory().await.unwrap();
        let note = note_with_media(vec![image("lost.jpg", "/old/lost.jpg")]);
        let document = BackupArchive::new(vec![note.clone()]).render().unwrap();

        mount_listing(&server, listing(&[("r-notes", NOTES_OBJECT_NAME)])).await;
        mount_download(&server, "r-notes", document).await;

        let sync = orchestrator(&server, &db, dir.path());
        let states = sync.start_restore().unwrap().wait().await;
        assert_eq!(states.last(), Some(&SyncState::Success));

        let restored = db.get_note(&note.id).await.unwrap().unwrap();
        assert_eq!(restored.media_items().next().unwrap().uri(), "/old/lost.jpg");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_archive_fails_without_touching_the_store() {
        let _pass = test_support::exclusive_pass().await;
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseService::open_in_memory().await.unwrap();

        mount_listing(&server, listing(&[("r-notes", NOTES_OBJECT_NAME)])).await;
        mount_download(&server, "r-notes", b"{broken".to_vec()).await;

        let sync = orchestrator(&server, &db, dir.path());
        let states = sync.start_restore().unwrap().wait().await;

        assert_eq!(states.len(), 1);
        assert_eq!(failure_kind(&states), FailureKind::Format);
        assert!(db.list_notes().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_without_backup_reports_remote_failure() {
        let _pass = test_support::exclusive_pass().await;
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseService::open_in_memory().await.unwrap();
        mount_listing(&server, listing(&[("r-x", "x.jpg")])).await;

        let sync = orchestrator(&server, &db, dir.path());
        let states = sync.start_restore().unwrap().wait().await;

        assert_eq!(failure_kind(&states), FailureKind::Remote);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_pass_is_refused_while_one_runs() {
        let _pass = test_support::exclusive_pass().await;
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseService::open_in_memory().await.unwrap();

        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(listing(&[]))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        mount_uploads(&server, 1).await;

        let sync = orchestrator(&server, &db, dir.path());
        let first = sync.start_backup(BackupOptions::default()).unwrap();
        assert!(sync.is_running());
        assert!(sync.start_restore().is_none());
        assert!(sync.start_backup(BackupOptions::default()).is_none());

        assert_eq!(first.wait().await, vec![SyncState::Success]);
        assert!(!sync.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_pass_reports_cancellation() {
        let _pass = test_support::exclusive_pass().await;
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseService::open_in_memory().await.unwrap();

        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(listing(&[]))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let sync = orchestrator(&server, &db, dir.path());
        let handle = sync.start_restore().unwrap();
        handle.cancel();
        let states = handle.wait().await;

        assert_eq!(states.len(), 1);
        assert_eq!(failure_kind(&states), FailureKind::Cancelled);
        assert!(!sync.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn repeated_unauthorized_fails_with_authentication() {
        let _pass = test_support::exclusive_pass().await;
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseService::open_in_memory().await.unwrap();

        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        test_support::mount_token_endpoint(&server, "fresh-token", 1).await;

        let sync = orchestrator(&server, &db, dir.path());
        let states = sync
            .start_backup(BackupOptions::default())
            .unwrap()
            .wait()
            .await;

        assert_eq!(failure_kind(&states), FailureKind::Authentication);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn one_pass_per_process_across_orchestrators() {
        let _pass = test_support::exclusive_pass().await;
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseService::open_in_memory().await.unwrap();
        let other_db = DatabaseService::open_in_memory().await.unwrap();

        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(listing(&[]))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        mount_uploads(&server, 1).await;

        let first = orchestrator(&server, &db, dir.path());
        let second = orchestrator(&server, &other_db, dir.path());
        let handle = first.start_backup(BackupOptions::default()).unwrap();
        assert!(second.is_running());
        assert!(second.start_restore().is_none());

        assert_eq!(handle.wait().await, vec![SyncState::Success]);
        assert!(!second.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_download_keeps_the_previous_local_file() {
        let _pass = test_support::exclusive_pass().await;
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let media_root = dir.path().join("media");
        std::fs::create_dir_all(&media_root).unwrap();
        std::fs::write(media_root.join("0191.jpg"), b"old").unwrap();
        let db = DatabaseService::open_in_memory().await.unwrap();

        let note = note_with_media(vec![image("0191.jpg", "/old/device/0191.jpg")]);
        let document = BackupArchive::new(vec![note.clone()]).render().unwrap();
        mount_listing(
            &server,
            serde_json::json!({ "files": [
                { "id": "r-notes", "name": NOTES_OBJECT_NAME },
                { "id": "r-img", "name": "0191.jpg", "size": "9" },
            ]}),
        )
        .await;
        mount_download(&server, "r-notes", document).await;
        Mock::given(method("GET"))
            .and(path("/files/r-img"))
            .and(query_param("alt", "media"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"new bytes".to_vec())
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let sync = orchestrator(&server, &db, &media_root);
        let handle = sync.start_restore().unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.cancel();
        let states = handle.wait().await;

        assert_eq!(failure_kind(&states), FailureKind::Cancelled);
        assert_eq!(std::fs::read(media_root.join("0191.jpg")).unwrap(), b"old");
        assert!(db.get_note(&note.id).await.unwrap().is_none());
    }
}
