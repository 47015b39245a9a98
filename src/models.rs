use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const EML_EXTENSION: &str = ".eml";
pub const RFC822_CONTENT_TYPE: &str = "message/rfc822";

pub const NO_SUBJECT: &str = "No Subject";
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Bearer token used against the Gmail API.
///
/// Never empty. The value is opaque: whether it is still accepted is only
/// known once the API answers.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

impl MessageHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSummary {
    pub id: String,
    pub subject: String,
    pub from: String,
    pub date: String,
}

impl EmailSummary {
    /// Builds a summary from a message's header list, substituting
    /// placeholders for absent headers.
    pub fn from_headers(id: impl Into<String>, headers: &[MessageHeader]) -> Self {
        let find = |name: &str| {
            headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.clone())
        };

        Self {
            id: id.into(),
            subject: find("Subject").unwrap_or_else(|| NO_SUBJECT.to_string()),
            from: find("From").unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
            date: find("Date").unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    Pending,
    Uploading,
    Success,
    Error(String),
}

impl UploadState {
    fn rank(&self) -> u8 {
        match self {
            UploadState::Pending => 0,
            UploadState::Uploading => 1,
            UploadState::Success | UploadState::Error(_) => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    pub fn label(&self) -> &'static str {
        match self {
            UploadState::Pending => "Pending",
            UploadState::Uploading => "Uploading...",
            UploadState::Success => "✓ Uploaded",
            UploadState::Error(_) => "Failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadStatus {
    pub file_name: String,
    pub state: UploadState,
}

impl UploadStatus {
    pub fn pending(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            state: UploadState::Pending,
        }
    }

    /// Moves to `next` if it is exactly one step further along
    /// pending -> uploading -> success|error. Returns whether the
    /// transition was applied.
    pub fn advance(&mut self, next: UploadState) -> bool {
        if next.rank() != self.state.rank() + 1 {
            return false;
        }
        self.state = next;
        true
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            UploadState::Error(msg) => Some(msg),
            _ => None,
        }
    }
}

/// A file offered for upload. Only the name and declared content type take
/// part in filtering; content is read when the file's turn comes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub name: String,
    pub content_type: Option<String>,
    pub path: PathBuf,
}

impl CandidateFile {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        Self {
            name,
            content_type: None,
            path: path.to_path_buf(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn is_supported(&self) -> bool {
        self.name.ends_with(EML_EXTENSION)
            || self.content_type.as_deref() == Some(RFC822_CONTENT_TYPE)
    }
}
