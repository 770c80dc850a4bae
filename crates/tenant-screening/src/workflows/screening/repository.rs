use chrono::{DateTime, Utc};

use super::domain::{
    LandlordId, OrderId, ReferenceNumber, ScreeningOrder, StoredCredentials, SubmissionId,
    SubmissionSnapshot, SubmissionStatus,
};

/// Persistent record of screening orders.
pub trait OrderStore: Send + Sync {
    fn insert(&self, order: ScreeningOrder) -> Result<ScreeningOrder, RepositoryError>;
    fn update(&self, order: ScreeningOrder) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &OrderId) -> Result<Option<ScreeningOrder>, RepositoryError>;
    fn find_by_reference(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Option<ScreeningOrder>, RepositoryError>;
    fn for_submission(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<Vec<ScreeningOrder>, RepositoryError>;
    /// Non-terminal orders whose next check is at or before `now`, oldest first.
    fn due_for_poll(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScreeningOrder>, RepositoryError>;
}

/// Read/write access to the submission aggregate owned by the application.
pub trait SubmissionStore: Send + Sync {
    fn fetch(&self, id: &SubmissionId) -> Result<Option<SubmissionSnapshot>, RepositoryError>;
    /// Forward-only compare-and-set, evaluated under the store's own lock or transaction.
    /// Writes only when `candidate` is later than the stored status and no decision is
    /// recorded; returns the replaced status, or `None` when nothing was written.
    fn advance_status(
        &self,
        id: &SubmissionId,
        candidate: SubmissionStatus,
    ) -> Result<Option<SubmissionStatus>, RepositoryError>;
}

/// Resolves and decrypts a landlord's stored vendor credentials on demand.
pub trait CredentialStore: Send + Sync {
    fn resolve(&self, landlord: &LandlordId) -> Result<Option<StoredCredentials>, CredentialError>;
}

/// Error enumeration for store failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("stored credentials could not be decrypted: {0}")]
    Decryption(String),
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}
