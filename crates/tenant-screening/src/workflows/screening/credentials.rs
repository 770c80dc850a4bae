use std::sync::Arc;

use super::domain::{SubmissionId, VendorCredentials};
use super::repository::{CredentialError, CredentialStore, RepositoryError, SubmissionStore};

/// Picks the credentials used for a vendor call on behalf of a submission:
/// the landlord's own verified credentials when present, else the system default.
pub struct CredentialResolver<S> {
    submissions: Arc<S>,
    store: Arc<dyn CredentialStore>,
    default: Option<VendorCredentials>,
}

impl<S> Clone for CredentialResolver<S> {
    fn clone(&self) -> Self {
        Self {
            submissions: Arc::clone(&self.submissions),
            store: Arc::clone(&self.store),
            default: self.default.clone(),
        }
    }
}

impl<S> CredentialResolver<S>
where
    S: SubmissionStore + 'static,
{
    pub fn new(
        submissions: Arc<S>,
        store: Arc<dyn CredentialStore>,
        default: Option<VendorCredentials>,
    ) -> Self {
        Self {
            submissions,
            store,
            default,
        }
    }

    pub fn default_credentials(&self) -> Option<&VendorCredentials> {
        self.default.as_ref()
    }

    pub fn resolve(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<VendorCredentials, CredentialResolutionError> {
        let landlord = self
            .submissions
            .fetch(submission_id)?
            .and_then(|submission| submission.landlord_id);

        if let Some(landlord) = landlord {
            match self.store.resolve(&landlord)? {
                Some(stored) if stored.verified => return Ok(stored.credentials),
                _ => {}
            }
        }

        self.default
            .clone()
            .ok_or(CredentialResolutionError::NoneAvailable)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialResolutionError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("no verified landlord credentials and no system default configured")]
    NoneAvailable,
}
