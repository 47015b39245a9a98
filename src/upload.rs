use crate::error::AppError;
use crate::gmail::{MailApi, MailConnector, encode_raw};
use crate::labels::resolve_label;
use crate::models::{CandidateFile, RFC822_CONTENT_TYPE, UploadState, UploadStatus};
use crate::session::Session;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// How much of an extensionless file is read to recognise a message.
const SNIFF_LIMIT: u64 = 8 * 1024;

/// Builds the candidate for `path`. A file without the `.eml` extension is
/// declared `message/rfc822` when it starts with a mail header block.
pub async fn candidate_from_path(path: impl AsRef<Path>) -> CandidateFile {
    let file = CandidateFile::from_path(path);
    if file.is_supported() {
        return file;
    }

    match read_head(&file.path).await {
        Ok(head) if looks_like_rfc822(&head) => file.with_content_type(RFC822_CONTENT_TYPE),
        Ok(_) => file,
        Err(e) => {
            tracing::debug!("Could not inspect {}: {}", file.path.display(), e);
            file
        }
    }
}

async fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::new();
    file.take(SNIFF_LIMIT).read_to_end(&mut head).await?;
    Ok(head)
}

/// True when `head` opens with `Name: value` header lines (continuations
/// allowed) that include `From` and at least one other message header.
fn looks_like_rfc822(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head);
    let mut names: Vec<String> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            if names.is_empty() {
                return false;
            }
            continue;
        }
        let Some((name, _)) = line.split_once(':') else {
            return false;
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_graphic()) {
            return false;
        }
        names.push(name.to_ascii_lowercase());
    }

    names.iter().any(|n| n == "from")
        && names
            .iter()
            .any(|n| matches!(n.as_str(), "date" | "subject" | "to" | "message-id" | "received"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every accepted file reached a terminal state.
    Completed,
    /// The credential was missing or rejected; the rest of the batch was
    /// abandoned and the session cleared.
    CredentialRejected(String),
}

#[derive(Debug, Clone)]
pub struct UploadReport {
    pub statuses: Vec<UploadStatus>,
    pub outcome: BatchOutcome,
}

impl UploadReport {
    pub fn succeeded(&self) -> usize {
        self.statuses
            .iter()
            .filter(|s| s.state == UploadState::Success)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.statuses
            .iter()
            .filter(|s| matches!(s.state, UploadState::Error(_)))
            .count()
    }
}

/// Uploads `.eml` files one at a time and tags each with the sample label.
pub struct BatchUploader<'a, C> {
    connector: &'a C,
    session: &'a Session,
    label_name: &'a str,
}

impl<'a, C: MailConnector> BatchUploader<'a, C> {
    pub fn new(connector: &'a C, session: &'a Session, label_name: &'a str) -> Self {
        Self {
            connector,
            session,
            label_name,
        }
    }

    /// Runs one batch. `on_update` sees every status change together with
    /// the entry's position in the batch, starting with the pending entries.
    ///
    /// Unsupported files are dropped without a status entry. Files are
    /// processed strictly in order so a rejected credential stops the batch
    /// before any further file is touched.
    pub async fn upload<F>(&self, files: Vec<CandidateFile>, mut on_update: F) -> UploadReport
    where
        F: FnMut(usize, &UploadStatus),
    {
        let files: Vec<CandidateFile> = files
            .into_iter()
            .filter(|f| {
                let keep = f.is_supported();
                if !keep {
                    tracing::debug!("Skipping unsupported file {:?}", f.name);
                }
                keep
            })
            .collect();

        let mut statuses: Vec<UploadStatus> = files
            .iter()
            .map(|f| UploadStatus::pending(f.name.clone()))
            .collect();
        for (index, status) in statuses.iter().enumerate() {
            on_update(index, status);
        }

        if files.is_empty() {
            return UploadReport {
                statuses,
                outcome: BatchOutcome::Completed,
            };
        }

        let Some(credential) = self.session.get() else {
            tracing::warn!("Upload attempted without an access token");
            return UploadReport {
                statuses,
                outcome: BatchOutcome::CredentialRejected(
                    AppError::MissingCredential.to_string(),
                ),
            };
        };
        let api = self.connector.connect(&credential);

        let mut label_id: Option<String> = None;

        for (index, file) in files.iter().enumerate() {
            statuses[index].advance(UploadState::Uploading);
            on_update(index, &statuses[index]);

            let result = self.upload_one(&api, file, &mut label_id).await;

            match result {
                Ok(message_id) => {
                    tracing::info!("Uploaded {} as {}", file.name, message_id);
                    statuses[index].advance(UploadState::Success);
                    on_update(index, &statuses[index]);
                }
                Err(err) if err.is_credential() => {
                    tracing::error!("Credential rejected while uploading {}: {}", file.name, err);
                    statuses[index].advance(UploadState::Error(err.to_string()));
                    on_update(index, &statuses[index]);
                    self.session.clear();
                    return UploadReport {
                        statuses,
                        outcome: BatchOutcome::CredentialRejected(err.to_string()),
                    };
                }
                Err(err) => {
                    tracing::error!("Error uploading file {}: {}", file.name, err);
                    statuses[index].advance(UploadState::Error(err.to_string()));
                    on_update(index, &statuses[index]);
                }
            }
        }

        UploadReport {
            statuses,
            outcome: BatchOutcome::Completed,
        }
    }

    /// Read, encode, insert and label a single file. The label id is
    /// resolved on first use and reused for the rest of the batch.
    async fn upload_one(
        &self,
        api: &C::Api,
        file: &CandidateFile,
        label_id: &mut Option<String>,
    ) -> Result<String, AppError> {
        let label = match label_id {
            Some(id) => id.clone(),
            None => {
                let id = resolve_label(api, self.label_name).await?;
                *label_id = Some(id.clone());
                id
            }
        };

        let content = tokio::fs::read(&file.path).await.map_err(|e| {
            AppError::Operation(format!("Failed to read {}: {}", file.path.display(), e))
        })?;
        let raw = encode_raw(&content);

        let message_id = api.insert_message(&raw).await?;
        api.add_labels(&message_id, &[label]).await?;

        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MailError;
    use crate::models::Credential;
    use crate::session::MemoryStore;
    use crate::testing::{MockConnector, MockMailbox};
    use std::path::Path;
    use tempfile::TempDir;

    const LABEL: &str = "Phish Sample";

    fn signed_in_session() -> Session {
        let session = Session::restore(Box::new(MemoryStore::default()));
        session.set(Credential::new("token-1").unwrap()).unwrap();
        session
    }

    fn write_eml(dir: &Path, name: &str, subject: &str) -> CandidateFile {
        let path = dir.join(name);
        let content = format!(
            "From: sender@example.com\r\nTo: me@example.com\r\nSubject: {}\r\nDate: Tue, 1 Oct 2024 10:00:00 +0000\r\n\r\nBody\r\n",
            subject
        );
        std::fs::write(&path, content).unwrap();
        CandidateFile::from_path(path)
    }

    #[tokio::test]
    async fn test_mixed_batch_uploads_only_eml() {
        let dir = TempDir::new().unwrap();
        let a = write_eml(dir.path(), "a.eml", "Hello");
        let b = write_eml(dir.path(), "b.txt", "Ignored");

        let connector = MockConnector::new(MockMailbox::new());
        let session = signed_in_session();
        let uploader = BatchUploader::new(&connector, &session, LABEL);

        let mut events = Vec::new();
        let report = uploader
            .upload(vec![a, b], |i, s| events.push((i, s.state.clone())))
            .await;

        assert_eq!(report.outcome, BatchOutcome::Completed);
        assert_eq!(report.statuses.len(), 1);
        assert_eq!(report.statuses[0].file_name, "a.eml");
        assert_eq!(report.statuses[0].state, UploadState::Success);
        assert_eq!(
            events,
            vec![
                (0, UploadState::Pending),
                (0, UploadState::Uploading),
                (0, UploadState::Success),
            ]
        );
        assert_eq!(connector.mailbox.create_label_calls(), 1);
        assert_eq!(connector.mailbox.insert_calls(), 1);
    }

    #[tokio::test]
    async fn test_rejected_files_make_no_calls() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            write_eml(dir.path(), "notes.txt", "x"),
            write_eml(dir.path(), "mail.eml.bak", "y"),
        ];

        let connector = MockConnector::new(MockMailbox::new());
        let session = signed_in_session();
        let uploader = BatchUploader::new(&connector, &session, LABEL);

        let mut updates = 0;
        let report = uploader.upload(files, |_, _| updates += 1).await;

        assert!(report.statuses.is_empty());
        assert_eq!(updates, 0);
        assert!(connector.tokens_used().is_empty());
        assert_eq!(connector.mailbox.insert_calls(), 0);
        assert_eq!(connector.mailbox.create_label_calls(), 0);
    }

    #[tokio::test]
    async fn test_content_type_admits_file_without_extension() {
        let dir = TempDir::new().unwrap();
        let file = write_eml(dir.path(), "message", "Typed");
        let file = candidate_from_path(&file.path).await;
        assert_eq!(file.content_type.as_deref(), Some(RFC822_CONTENT_TYPE));

        let connector = MockConnector::new(MockMailbox::new());
        let session = signed_in_session();
        let report = BatchUploader::new(&connector, &session, LABEL)
            .upload(vec![file], |_, _| {})
            .await;

        assert_eq!(report.succeeded(), 1);
    }

    #[tokio::test]
    async fn test_insert_uses_base64url() {
        let dir = TempDir::new().unwrap();
        let file = write_eml(dir.path(), "a.eml", "Encoded ~~~ ???");
        let expected = encode_raw(&std::fs::read(&file.path).unwrap());

        let connector = MockConnector::new(MockMailbox::new());
        let session = signed_in_session();
        BatchUploader::new(&connector, &session, LABEL)
            .upload(vec![file], |_, _| {})
            .await;

        let raw = connector.mailbox.raw_inserts();
        assert_eq!(raw, vec![expected]);
        assert!(!raw[0].contains('+') && !raw[0].contains('/') && !raw[0].contains('='));
    }

    #[tokio::test]
    async fn test_candidate_sniffing() {
        let dir = TempDir::new().unwrap();

        let plain = dir.path().join("notes");
        std::fs::write(&plain, "Remember to file the report: today\n").unwrap();
        assert_eq!(candidate_from_path(&plain).await.content_type, None);

        let mbox = dir.path().join("archive");
        std::fs::write(
            &mbox,
            "From sender@example.com Tue Oct  1 10:00:00 2024\nFrom: sender@example.com\n\nBody\n",
        )
        .unwrap();
        assert_eq!(candidate_from_path(&mbox).await.content_type, None);

        let folded = dir.path().join("folded");
        std::fs::write(
            &folded,
            "Received: from mx.example.com\r\n\tby mail.example.org; Tue, 1 Oct 2024\r\nFrom: a@example.com\r\nSubject: hi\r\n\r\nBody\r\n",
        )
        .unwrap();
        assert_eq!(
            candidate_from_path(&folded).await.content_type.as_deref(),
            Some(RFC822_CONTENT_TYPE)
        );

        let missing = candidate_from_path(dir.path().join("gone")).await;
        assert!(!missing.is_supported());

        // .eml files are admitted without being opened.
        let eml = candidate_from_path(dir.path().join("absent.eml")).await;
        assert!(eml.is_supported());
        assert_eq!(eml.content_type, None);
    }

    #[tokio::test]
    async fn test_overlapping_batches_share_the_new_label() {
        let dir = TempDir::new().unwrap();
        let first = write_eml(dir.path(), "first.eml", "one");
        let second = write_eml(dir.path(), "second.eml", "two");

        let connector = MockConnector::new(MockMailbox::new());
        let session = signed_in_session();
        let uploader = BatchUploader::new(&connector, &session, LABEL);

        let (a, b) = tokio::join!(
            uploader.upload(vec![first], |_, _| {}),
            uploader.upload(vec![second], |_, _| {})
        );

        assert_eq!(a.succeeded() + b.succeeded(), 2);
        let label = crate::labels::find_label(&connector.mailbox, LABEL)
            .await
            .unwrap()
            .unwrap();
        for id in connector.mailbox.message_ids() {
            assert_eq!(connector.mailbox.labels_of(&id), vec![label.clone()]);
        }
    }

    #[tokio::test]
    async fn test_label_applied_and_resolved_once_per_batch() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            write_eml(dir.path(), "1.eml", "one"),
            write_eml(dir.path(), "2.eml", "two"),
            write_eml(dir.path(), "3.eml", "three"),
        ];

        let mailbox = MockMailbox::new();
        let label_id = mailbox.seed_label(LABEL);
        let connector = MockConnector::new(mailbox);
        let session = signed_in_session();

        let report = BatchUploader::new(&connector, &session, LABEL)
            .upload(files, |_, _| {})
            .await;

        assert_eq!(report.succeeded(), 3);
        assert_eq!(connector.mailbox.create_label_calls(), 0);
        for id in connector.mailbox.message_ids() {
            assert_eq!(connector.mailbox.labels_of(&id), vec![label_id.clone()]);
        }
    }

    #[tokio::test]
    async fn test_credential_failure_aborts_remaining_files() {
        let dir = TempDir::new().unwrap();
        let files: Vec<CandidateFile> = (1..=4)
            .map(|i| write_eml(dir.path(), &format!("{}.eml", i), "s"))
            .collect();

        let mailbox = MockMailbox::new();
        mailbox.fail_insert_attempt(2, MailError::Unauthorized("Invalid Credentials".into()));
        let connector = MockConnector::new(mailbox);
        let session = signed_in_session();

        let mut events = Vec::new();
        let report = BatchUploader::new(&connector, &session, LABEL)
            .upload(files, |i, s| events.push((i, s.state.clone())))
            .await;

        assert!(matches!(report.outcome, BatchOutcome::CredentialRejected(_)));
        assert!(session.get().is_none());
        assert_eq!(connector.mailbox.insert_calls(), 2);

        let states: Vec<&UploadState> = report.statuses.iter().map(|s| &s.state).collect();
        assert_eq!(states[0], &UploadState::Success);
        assert!(matches!(states[1], UploadState::Error(_)));
        assert_eq!(states[2], &UploadState::Pending);
        assert_eq!(states[3], &UploadState::Pending);

        assert!(!events.iter().any(|(i, s)| *i >= 2 && *s != UploadState::Pending));
    }

    #[tokio::test]
    async fn test_other_failure_marks_file_and_continues() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            write_eml(dir.path(), "1.eml", "one"),
            write_eml(dir.path(), "2.eml", "two"),
        ];

        let mailbox = MockMailbox::new();
        mailbox.fail_insert_attempt(1, MailError::Api("Message too large".into()));
        let connector = MockConnector::new(mailbox);
        let session = signed_in_session();

        let report = BatchUploader::new(&connector, &session, LABEL)
            .upload(files, |_, _| {})
            .await;

        assert_eq!(report.outcome, BatchOutcome::Completed);
        assert_eq!(
            report.statuses[0].error_message(),
            Some("Message too large")
        );
        assert_eq!(report.statuses[1].state, UploadState::Success);
        assert!(session.get().is_some());
    }

    #[tokio::test]
    async fn test_unreadable_file_is_an_operation_error() {
        let dir = TempDir::new().unwrap();
        let missing = CandidateFile::from_path(dir.path().join("gone.eml"));
        let present = write_eml(dir.path(), "here.eml", "present");

        let connector = MockConnector::new(MockMailbox::new());
        let session = signed_in_session();
        let report = BatchUploader::new(&connector, &session, LABEL)
            .upload(vec![missing, present], |_, _| {})
            .await;

        assert_eq!(report.failed(), 1);
        assert_eq!(report.succeeded(), 1);
        assert!(
            report.statuses[0]
                .error_message()
                .unwrap()
                .starts_with("Failed to read")
        );
    }

    #[tokio::test]
    async fn test_missing_credential_attempts_nothing() {
        let dir = TempDir::new().unwrap();
        let file = write_eml(dir.path(), "a.eml", "s");

        let connector = MockConnector::new(MockMailbox::new());
        let session = Session::restore(Box::new(MemoryStore::default()));
        let report = BatchUploader::new(&connector, &session, LABEL)
            .upload(vec![file], |_, _| {})
            .await;

        assert!(matches!(report.outcome, BatchOutcome::CredentialRejected(_)));
        assert_eq!(report.statuses[0].state, UploadState::Pending);
        assert!(connector.tokens_used().is_empty());
    }

    #[tokio::test]
    async fn test_label_list_rejection_aborts_batch() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            write_eml(dir.path(), "1.eml", "one"),
            write_eml(dir.path(), "2.eml", "two"),
        ];

        let mailbox = MockMailbox::new();
        mailbox.fail_list_labels(MailError::Unauthorized("Token expired".into()));
        let connector = MockConnector::new(mailbox);
        let session = signed_in_session();

        let report = BatchUploader::new(&connector, &session, LABEL)
            .upload(files, |_, _| {})
            .await;

        assert!(matches!(report.outcome, BatchOutcome::CredentialRejected(_)));
        assert_eq!(connector.mailbox.insert_calls(), 0);
        assert_eq!(report.statuses[1].state, UploadState::Pending);
        assert!(session.get().is_none());
    }
}
