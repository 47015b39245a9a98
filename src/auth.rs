use crate::error::LoginError;
use crate::models::Credential;
use crate::session::Session;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use yup_oauth2::authenticator::Authenticator;
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;

pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.insert",
    "https://www.googleapis.com/auth/gmail.modify",
];

const ACCESS_TOKEN_PARAM: &str = "access_token";

pub type OAuthConnector = hyper_rustls::HttpsConnector<hyper::client::HttpConnector>;

/// Result of an interactive token request: either a token or an error code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait TokenClient: Send + Sync {
    /// Runs the interactive consent flow.
    async fn request_access_token(&self) -> TokenResponse;
}

pub struct OAuthTokenClient {
    auth: Authenticator<OAuthConnector>,
}

impl OAuthTokenClient {
    pub fn new(auth: Authenticator<OAuthConnector>) -> Self {
        Self { auth }
    }
}

#[async_trait]
impl TokenClient for OAuthTokenClient {
    async fn request_access_token(&self) -> TokenResponse {
        match self.auth.force_refreshed_token(SCOPES).await {
            Ok(token) => TokenResponse {
                access_token: token.token().map(str::to_string),
                error: None,
            },
            Err(e) => TokenResponse {
                access_token: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Shows the consent URL to the user and opens it in the browser.
///
/// With a channel the URL goes to the TUI; without one it is printed to
/// stderr.
pub struct BrowserDelegate {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl BrowserDelegate {
    pub fn tui(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn terminal() -> Self {
        Self { tx: None }
    }
}

impl InstalledFlowDelegate for BrowserDelegate {
    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        _need_code: bool,
    ) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>> {
        Box::pin(async move {
            match &self.tx {
                Some(tx) => {
                    let _ = tx.send(url.to_string());
                }
                None => eprintln!(
                    "Sign in with Google by opening this URL in your browser:\n\n{}\n",
                    url
                ),
            }
            if let Err(e) = open::that(url) {
                tracing::warn!("Could not open browser: {}", e);
            }
            // The redirect flow receives the code itself.
            Ok(String::new())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated,
    /// Another login was still outstanding; nothing was started.
    AlreadyInFlight,
}

/// User-triggered sign-in. At most one consent request runs at a time.
#[derive(Default)]
pub struct LoginFlow {
    in_flight: AtomicBool,
}

impl LoginFlow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub async fn login(
        &self,
        tokens: &dyn TokenClient,
        session: &Session,
    ) -> Result<LoginOutcome, LoginError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Login already in progress");
            return Ok(LoginOutcome::AlreadyInFlight);
        }

        let response = tokens.request_access_token().await;
        self.in_flight.store(false, Ordering::SeqCst);

        if let Some(error) = response.error {
            tracing::error!("Login failed: {}", error);
            return Err(LoginError::Denied(error));
        }

        let credential = response
            .access_token
            .and_then(Credential::new)
            .ok_or(LoginError::NoToken)?;

        // The in-memory session is usable even when the keyring is not.
        if let Err(e) = session.set(credential) {
            tracing::warn!("Signed in for this run only: {:#}", e);
        }

        tracing::info!("Login succeeded");
        Ok(LoginOutcome::Authenticated)
    }
}

/// Reads `access_token` out of a redirect URL fragment.
///
/// Accepts a full URL (`https://host/path#access_token=...`), a bare
/// fragment with or without the leading `#`, or a query-style string.
pub fn credential_from_redirect(input: &str) -> Option<Credential> {
    let input = input.trim();
    let fragment = match url::Url::parse(input) {
        Ok(url) => url.fragment().map(str::to_string)?,
        Err(_) => input.trim_start_matches('#').to_string(),
    };

    url::form_urlencoded::parse(fragment.as_bytes())
        .find(|(key, _)| key == ACCESS_TOKEN_PARAM)
        .and_then(|(_, value)| Credential::new(value.into_owned()))
}
