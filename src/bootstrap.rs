use crate::auth::{BrowserDelegate, OAuthTokenClient, TokenClient};
use crate::config::Config;
use crate::error::InitError;
use crate::gmail::{ApiSettings, GmailClient, HttpClient, MailConnector};
use crate::models::Credential;
use std::path::Path;
use yup_oauth2::{
    ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod,
    read_application_secret,
};

/// Everything built at start-up that later flows need: the HTTP client
/// configured for the Gmail API and the OAuth token client.
///
/// Constructed once and shared by reference.
pub struct Platform {
    http: HttpClient,
    settings: ApiSettings,
    tokens: Box<dyn TokenClient>,
}

impl Platform {
    pub fn new(http: HttpClient, settings: ApiSettings, tokens: Box<dyn TokenClient>) -> Self {
        Self {
            http,
            settings,
            tokens,
        }
    }

    pub fn token_client(&self) -> &dyn TokenClient {
        self.tokens.as_ref()
    }
}

impl MailConnector for Platform {
    type Api = GmailClient;

    fn connect(&self, credential: &Credential) -> GmailClient {
        GmailClient::new(self.http.clone(), credential, self.settings.clone())
    }
}

/// Builds the API client and the token client. Both steps run
/// concurrently; the first failure aborts start-up.
pub async fn initialize(config: &Config, delegate: BrowserDelegate) -> Result<Platform, InitError> {
    let (http, tokens) = tokio::try_join!(
        build_api_client(),
        build_token_client(&config.auth.client_secret, delegate)
    )?;

    let settings = ApiSettings {
        base_url: normalize_base_url(&config.api.base_url),
        api_key: config.api.api_key.clone(),
    };
    tracing::info!("Gmail API client ready ({})", settings.base_url);

    Ok(Platform::new(http, settings, tokens))
}

async fn build_api_client() -> Result<HttpClient, InitError> {
    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(|e| InitError::ApiClient(format!("Failed to load native roots: {}", e)))?
        .https_or_http()
        .enable_http1()
        .build();

    Ok(hyper::Client::builder().build(connector))
}

async fn build_token_client(
    secret_path: &Path,
    delegate: BrowserDelegate,
) -> Result<Box<dyn TokenClient>, InitError> {
    let secret = load_secret(secret_path).await?;

    let auth = InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect)
        .flow_delegate(Box::new(delegate))
        .build()
        .await
        .map_err(|e| InitError::TokenClient(e.to_string()))?;

    tracing::info!("Token client ready");
    Ok(Box::new(OAuthTokenClient::new(auth)))
}

pub async fn load_secret(path: &Path) -> Result<ApplicationSecret, InitError> {
    read_application_secret(path)
        .await
        .map_err(|e| InitError::Secret {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn normalize_base_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}
