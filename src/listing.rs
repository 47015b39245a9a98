use crate::error::AppError;
use crate::gmail::{MailApi, MailConnector};
use crate::labels::find_label;
use crate::models::EmailSummary;
use crate::session::Session;
use futures::future::try_join_all;

pub const DEFAULT_MAX_RESULTS: u32 = 50;

/// Fetches summaries of the messages carrying the sample label.
///
/// Only the first page of up to `max_results` ids is read. Detail fetches
/// run concurrently; the result keeps the order the ids were listed in.
/// A rejected credential clears the session.
pub async fn list_uploaded<C: MailConnector>(
    connector: &C,
    session: &Session,
    label_name: &str,
    max_results: u32,
) -> Result<Vec<EmailSummary>, AppError> {
    let credential = session.get().ok_or(AppError::MissingCredential)?;
    let api = connector.connect(&credential);

    let result = fetch_summaries(&api, label_name, max_results).await;

    if let Err(err) = &result {
        tracing::error!("Error loading emails: {}", err);
        if err.is_credential() {
            session.clear();
        }
    }
    result
}

async fn fetch_summaries<A: MailApi>(
    api: &A,
    label_name: &str,
    max_results: u32,
) -> Result<Vec<EmailSummary>, AppError> {
    let Some(label_id) = find_label(api, label_name).await? else {
        tracing::debug!("Label {:?} does not exist yet", label_name);
        return Ok(Vec::new());
    };

    let ids = api.list_message_ids(&label_id, max_results).await?;

    let details = try_join_all(ids.iter().map(|id| async move {
        let headers = api.get_message_headers(id).await?;
        Ok::<_, AppError>(EmailSummary::from_headers(id.clone(), &headers))
    }))
    .await?;

    tracing::debug!("Loaded {} uploaded samples", details.len());
    Ok(details)
}
