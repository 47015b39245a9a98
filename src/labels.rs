use crate::error::MailError;
use crate::gmail::MailApi;

/// Looks up a label by exact name without creating it.
pub async fn find_label<A: MailApi + ?Sized>(
    api: &A,
    name: &str,
) -> Result<Option<String>, MailError> {
    let labels = api.list_labels().await?;
    Ok(labels.into_iter().find(|l| l.name == name).map(|l| l.id))
}

/// Returns the id of the label called `name`, creating it when the mailbox
/// has none.
///
/// Resolving again after a creation goes through the list path. When a
/// create loses to an overlapping one, the label that won is returned.
pub async fn resolve_label<A: MailApi + ?Sized>(api: &A, name: &str) -> Result<String, MailError> {
    if let Some(id) = find_label(api, name).await? {
        tracing::debug!("Found label {:?} ({})", name, id);
        return Ok(id);
    }

    match api.create_label(name).await {
        Ok(created) => Ok(created.id),
        Err(MailError::Conflict(msg)) => {
            tracing::debug!("Label {:?} was created concurrently: {}", name, msg);
            find_label(api, name)
                .await?
                .ok_or(MailError::Conflict(msg))
        }
        Err(e) => Err(e),
    }
}
