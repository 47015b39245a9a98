use crate::error::MailError;
use crate::models::{Credential, Label, MessageHeader};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use google_gmail1::Gmail;
use google_gmail1::api::{Message, ModifyMessageRequest};
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use serde::Serialize;

pub type HttpClient = hyper::Client<HttpsConnector<HttpConnector>>;

const USER_ID: &str = "me";
const LABEL_LIST_VISIBILITY: &str = "labelShow";
const MESSAGE_LIST_VISIBILITY: &str = "show";
/// Inserted messages take their internal date from the `Date` header.
const INTERNAL_DATE_SOURCE: &str = "dateHeader";

/// The subset of the Gmail API this application talks to.
#[async_trait]
pub trait MailApi: Send + Sync {
    async fn list_labels(&self) -> Result<Vec<Label>, MailError>;

    async fn create_label(&self, name: &str) -> Result<Label, MailError>;

    async fn list_message_ids(
        &self,
        label_id: &str,
        max_results: u32,
    ) -> Result<Vec<String>, MailError>;

    async fn get_message_headers(&self, id: &str) -> Result<Vec<MessageHeader>, MailError>;

    /// Inserts a message given as base64url-encoded RFC 822 text, dated by
    /// its `Date` header. Returns the new message id.
    async fn insert_message(&self, raw: &str) -> Result<String, MailError>;

    async fn add_labels(&self, message_id: &str, label_ids: &[String]) -> Result<(), MailError>;
}

/// Produces an API handle bound to one credential.
pub trait MailConnector: Send + Sync {
    type Api: MailApi;

    fn connect(&self, credential: &Credential) -> Self::Api;
}

/// URL-safe base64 without padding, the encoding Gmail expects in `raw`.
pub fn encode_raw(content: &[u8]) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(content)
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Serialize)]
struct InsertRequest<'a> {
    raw: &'a str,
}

pub struct GmailClient {
    hub: Gmail<HttpsConnector<HttpConnector>>,
    http: HttpClient,
    token: String,
    settings: ApiSettings,
}

impl GmailClient {
    pub fn new(http: HttpClient, credential: &Credential, settings: ApiSettings) -> Self {
        let token = credential.as_str().to_string();
        let mut hub = Gmail::new(http.clone(), token.clone());
        hub.base_url(settings.base_url.clone());
        hub.root_url(settings.base_url.clone());

        Self {
            hub,
            http,
            token,
            settings,
        }
    }
}

fn insert_url(settings: &ApiSettings) -> String {
    let mut url = format!(
        "{}gmail/v1/users/{}/messages?internalDateSource={}",
        settings.base_url, USER_ID, INTERNAL_DATE_SOURCE
    );
    if let Some(key) = &settings.api_key {
        url.push_str("&key=");
        url.push_str(key);
    }
    url
}

#[async_trait]
impl MailApi for GmailClient {
    async fn list_labels(&self) -> Result<Vec<Label>, MailError> {
        let mut call = self.hub.users().labels_list(USER_ID);
        if let Some(key) = &self.settings.api_key {
            call = call.param("key", key.as_str());
        }
        let (_, label_list) = call.doit().await.map_err(classify)?;

        let labels = label_list
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|l| Label {
                id: l.id.unwrap_or_default(),
                name: l.name.unwrap_or_default(),
            })
            .collect();

        Ok(labels)
    }

    async fn create_label(&self, name: &str) -> Result<Label, MailError> {
        let request = google_gmail1::api::Label {
            name: Some(name.to_string()),
            label_list_visibility: Some(LABEL_LIST_VISIBILITY.to_string()),
            message_list_visibility: Some(MESSAGE_LIST_VISIBILITY.to_string()),
            ..Default::default()
        };

        let mut call = self.hub.users().labels_create(request, USER_ID);
        if let Some(key) = &self.settings.api_key {
            call = call.param("key", key.as_str());
        }
        let (_, created) = call.doit().await.map_err(classify)?;

        tracing::info!("Created label {:?}", name);
        Ok(Label {
            id: created.id.unwrap_or_default(),
            name: created.name.unwrap_or_else(|| name.to_string()),
        })
    }

    async fn list_message_ids(
        &self,
        label_id: &str,
        max_results: u32,
    ) -> Result<Vec<String>, MailError> {
        let mut call = self
            .hub
            .users()
            .messages_list(USER_ID)
            .add_label_ids(label_id)
            .max_results(max_results);
        if let Some(key) = &self.settings.api_key {
            call = call.param("key", key.as_str());
        }
        let (_, message_list) = call.doit().await.map_err(classify)?;

        Ok(message_list
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect())
    }

    async fn get_message_headers(&self, id: &str) -> Result<Vec<MessageHeader>, MailError> {
        let mut call = self.hub.users().messages_get(USER_ID, id).format("full");
        if let Some(key) = &self.settings.api_key {
            call = call.param("key", key.as_str());
        }
        let (_, msg) = call.doit().await.map_err(classify)?;

        Ok(headers_of(&msg))
    }

    async fn insert_message(&self, raw: &str) -> Result<String, MailError> {
        // The generated hub only offers insert as a media upload, so the
        // JSON form with a `raw` field is posted directly.
        let body = serde_json::to_vec(&InsertRequest { raw })
            .map_err(|e| MailError::Api(format!("Failed to encode insert request: {}", e)))?;

        let request = hyper::Request::builder()
            .method(hyper::Method::POST)
            .uri(insert_url(&self.settings))
            .header(hyper::header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(hyper::Body::from(body))
            .map_err(|e| MailError::Api(format!("Failed to build insert request: {}", e)))?;

        let response = self
            .http
            .request(request)
            .await
            .map_err(|e| MailError::Api(format!("Failed to insert message: {}", e)))?;
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| MailError::Api(format!("Failed to read insert response: {}", e)))?;

        if !status.is_success() {
            return Err(insert_error(status, &bytes));
        }

        let created: Message = serde_json::from_slice(&bytes)
            .map_err(|e| MailError::Api(format!("Failed to parse insert response: {}", e)))?;
        created
            .id
            .ok_or_else(|| MailError::Api("Insert response carried no message id".to_string()))
    }

    async fn add_labels(&self, message_id: &str, label_ids: &[String]) -> Result<(), MailError> {
        let req = ModifyMessageRequest {
            add_label_ids: Some(label_ids.to_vec()),
            remove_label_ids: None,
        };
        let mut call = self.hub.users().messages_modify(req, USER_ID, message_id);
        if let Some(key) = &self.settings.api_key {
            call = call.param("key", key.as_str());
        }
        call.doit().await.map_err(classify)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorKind {
    Unauthorized,
    Conflict,
    Other,
}

/// Maps a client error onto the credential/conflict/other split.
pub fn classify(err: google_gmail1::Error) -> MailError {
    let kind = match &err {
        google_gmail1::Error::MissingToken(_) => ErrorKind::Unauthorized,
        google_gmail1::Error::BadRequest(value) => payload_kind(value),
        google_gmail1::Error::Failure(response) => status_kind(response.status()),
        _ => ErrorKind::Other,
    };

    let message = match &err {
        google_gmail1::Error::BadRequest(value) => {
            error_message(value).unwrap_or_else(|| err.to_string())
        }
        _ => err.to_string(),
    };

    match kind {
        ErrorKind::Unauthorized => MailError::Unauthorized(message),
        ErrorKind::Conflict => MailError::Conflict(message),
        ErrorKind::Other => MailError::Api(message),
    }
}

/// Error for a non-2xx answer to the raw insert request.
fn insert_error(status: hyper::StatusCode, body: &[u8]) -> MailError {
    let payload = serde_json::from_slice::<serde_json::Value>(body).ok();
    let message = payload
        .as_ref()
        .and_then(error_message)
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());

    let kind = match status_kind(status) {
        ErrorKind::Other => payload.as_ref().map_or(ErrorKind::Other, payload_kind),
        kind => kind,
    };
    match kind {
        ErrorKind::Unauthorized => MailError::Unauthorized(message),
        _ => MailError::Api(format!("Insert failed ({}): {}", status, message)),
    }
}

fn status_kind(status: hyper::StatusCode) -> ErrorKind {
    match status {
        hyper::StatusCode::UNAUTHORIZED => ErrorKind::Unauthorized,
        hyper::StatusCode::CONFLICT => ErrorKind::Conflict,
        _ => ErrorKind::Other,
    }
}

fn payload_kind(value: &serde_json::Value) -> ErrorKind {
    let error = &value["error"];
    match (error["code"].as_i64(), error["status"].as_str()) {
        (Some(401), _) | (_, Some("UNAUTHENTICATED")) => ErrorKind::Unauthorized,
        (Some(409), _) | (_, Some("ALREADY_EXISTS")) => ErrorKind::Conflict,
        _ => ErrorKind::Other,
    }
}

fn error_message(value: &serde_json::Value) -> Option<String> {
    value["error"]["message"].as_str().map(str::to_string)
}

fn headers_of(msg: &Message) -> Vec<MessageHeader> {
    msg.payload
        .as_ref()
        .and_then(|p| p.headers.as_ref())
        .map(|headers| {
            headers
                .iter()
                .filter_map(|h| match (&h.name, &h.value) {
                    (Some(name), Some(value)) => Some(MessageHeader::new(name, value)),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}
