//! In-memory mailbox used by the unit tests.

use crate::error::MailError;
use crate::gmail::{MailApi, MailConnector};
use crate::models::{Credential, Label, MessageHeader};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    headers: Vec<MessageHeader>,
    label_ids: Vec<String>,
}

#[derive(Default)]
struct State {
    labels: Vec<Label>,
    /// Names that exist but are never listed, like system labels.
    reserved_names: Vec<String>,
    messages: Vec<StoredMessage>,
    next_id: usize,
    create_label_calls: usize,
    insert_calls: usize,
    get_calls: usize,
    raw_inserts: Vec<String>,
    fail_list_labels: Option<MailError>,
    fail_get: HashMap<String, MailError>,
    /// Insert failures keyed by the 1-based insert attempt number.
    fail_insert: HashMap<usize, MailError>,
}

/// Cloning shares the underlying state, so a connector can hand out
/// handles that all observe the same mailbox.
#[derive(Clone, Default)]
pub struct MockMailbox {
    state: Arc<Mutex<State>>,
}

impl MockMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().expect("mock state poisoned");
        f(&mut state)
    }

    fn next_id(state: &mut State, prefix: &str) -> String {
        state.next_id += 1;
        format!("{}{}", prefix, state.next_id)
    }

    pub fn seed_label(&self, name: &str) -> String {
        self.with(|s| {
            let id = Self::next_id(s, "Label_");
            s.labels.push(Label {
                id: id.clone(),
                name: name.to_string(),
            });
            id
        })
    }

    pub fn seed_message(&self, label_id: &str, headers: Vec<MessageHeader>) -> String {
        self.with(|s| {
            let id = Self::next_id(s, "msg");
            s.messages.push(StoredMessage {
                id: id.clone(),
                headers,
                label_ids: vec![label_id.to_string()],
            });
            id
        })
    }

    pub fn reserve_label_name(&self, name: &str) {
        self.with(|s| s.reserved_names.push(name.to_string()));
    }

    pub fn fail_list_labels(&self, err: MailError) {
        self.with(|s| s.fail_list_labels = Some(err));
    }

    pub fn fail_get(&self, id: &str, err: MailError) {
        self.with(|s| {
            s.fail_get.insert(id.to_string(), err);
        });
    }

    pub fn fail_insert_attempt(&self, attempt: usize, err: MailError) {
        self.with(|s| {
            s.fail_insert.insert(attempt, err);
        });
    }

    pub fn create_label_calls(&self) -> usize {
        self.with(|s| s.create_label_calls)
    }

    pub fn insert_calls(&self) -> usize {
        self.with(|s| s.insert_calls)
    }

    pub fn get_calls(&self) -> usize {
        self.with(|s| s.get_calls)
    }

    pub fn raw_inserts(&self) -> Vec<String> {
        self.with(|s| s.raw_inserts.clone())
    }

    pub fn labels_of(&self, message_id: &str) -> Vec<String> {
        self.with(|s| {
            s.messages
                .iter()
                .find(|m| m.id == message_id)
                .map(|m| m.label_ids.clone())
                .unwrap_or_default()
        })
    }

    pub fn message_ids(&self) -> Vec<String> {
        self.with(|s| s.messages.iter().map(|m| m.id.clone()).collect())
    }
}

/// Header block of an RFC 822 message, without folding support.
fn parse_headers(content: &str) -> Vec<MessageHeader> {
    content
        .lines()
        .take_while(|line| !line.trim().is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| MessageHeader::new(name.trim(), value.trim()))
        .collect()
}

#[async_trait]
impl MailApi for MockMailbox {
    async fn list_labels(&self) -> Result<Vec<Label>, MailError> {
        let result = self.with(|s| match &s.fail_list_labels {
            Some(err) => Err(err.clone()),
            None => Ok(s.labels.clone()),
        });
        // Overlapping resolutions both see the list before either creates.
        tokio::task::yield_now().await;
        result
    }

    async fn create_label(&self, name: &str) -> Result<Label, MailError> {
        self.with(|s| {
            s.create_label_calls += 1;
            if s.labels.iter().any(|l| l.name == name) || s.reserved_names.iter().any(|n| n == name) {
                return Err(MailError::Conflict("Label name exists or conflicts".into()));
            }
            let label = Label {
                id: Self::next_id(s, "Label_"),
                name: name.to_string(),
            };
            s.labels.push(label.clone());
            Ok(label)
        })
    }

    async fn list_message_ids(
        &self,
        label_id: &str,
        max_results: u32,
    ) -> Result<Vec<String>, MailError> {
        self.with(|s| {
            Ok(s.messages
                .iter()
                .filter(|m| m.label_ids.iter().any(|l| l == label_id))
                .take(max_results as usize)
                .map(|m| m.id.clone())
                .collect())
        })
    }

    async fn get_message_headers(&self, id: &str) -> Result<Vec<MessageHeader>, MailError> {
        let result = self.with(|s| {
            s.get_calls += 1;
            if let Some(err) = s.fail_get.get(id) {
                return Err(err.clone());
            }
            s.messages
                .iter()
                .find(|m| m.id == id)
                .map(|m| m.headers.clone())
                .ok_or_else(|| MailError::Api(format!("Requested entity was not found: {}", id)))
        });
        // Let other fetches run first so completion order differs from
        // request order.
        tokio::task::yield_now().await;
        result
    }

    async fn insert_message(&self, raw: &str) -> Result<String, MailError> {
        self.with(|s| {
            s.insert_calls += 1;
            if let Some(err) = s.fail_insert.get(&s.insert_calls) {
                return Err(err.clone());
            }
            s.raw_inserts.push(raw.to_string());

            let bytes = general_purpose::URL_SAFE_NO_PAD
                .decode(raw)
                .map_err(|e| MailError::Api(format!("Invalid raw: {}", e)))?;
            let content = String::from_utf8_lossy(&bytes).into_owned();

            let id = Self::next_id(s, "msg");
            s.messages.push(StoredMessage {
                id: id.clone(),
                headers: parse_headers(&content),
                label_ids: Vec::new(),
            });
            Ok(id)
        })
    }

    async fn add_labels(&self, message_id: &str, label_ids: &[String]) -> Result<(), MailError> {
        self.with(|s| {
            let msg = s
                .messages
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| MailError::Api(format!("Unknown message {}", message_id)))?;
            for id in label_ids {
                if !msg.label_ids.contains(id) {
                    msg.label_ids.push(id.clone());
                }
            }
            Ok(())
        })
    }
}

/// Hands out handles onto one shared mailbox and records which tokens
/// were used to connect.
#[derive(Clone, Default)]
pub struct MockConnector {
    pub mailbox: MockMailbox,
    tokens: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    pub fn new(mailbox: MockMailbox) -> Self {
        Self {
            mailbox,
            tokens: Arc::default(),
        }
    }

    pub fn tokens_used(&self) -> Vec<String> {
        self.tokens.lock().expect("mock state poisoned").clone()
    }
}

impl MailConnector for MockConnector {
    type Api = MockMailbox;

    fn connect(&self, credential: &Credential) -> MockMailbox {
        self.tokens
            .lock()
            .expect("mock state poisoned")
            .push(credential.as_str().to_string());
        self.mailbox.clone()
    }
}
