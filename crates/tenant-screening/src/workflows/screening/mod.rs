//! Screening order reconciliation.
//!
//! Orders are driven by two unordered channels, vendor pushes ([`webhook`]) and scheduled
//! pulls ([`scheduler`]). Both merge through [`reconcile`] and then recompute the owning
//! submission's status with [`aggregate`].

pub mod aggregate;
pub mod clock;
pub mod credentials;
pub mod domain;
pub mod reconcile;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod vendor;
pub mod webhook;

#[cfg(test)]
pub(crate) mod tests;

pub use aggregate::{candidate_status, AggregateOutcome, AggregateStatusDeriver, SkipReason};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::{CredentialResolutionError, CredentialResolver};
pub use domain::{
    Applicant, CallbackUrls, Invitation, LandlordId, OrderId, OrderView, PersonId,
    ReferenceNumber, ScreeningOrder, ScreeningStatus, StoredCredentials, SubmissionId,
    SubmissionSnapshot, SubmissionStatus, VendorCredentials, VendorReading,
};
pub use reconcile::{BackoffPolicy, FailureDisposition};
pub use repository::{
    CredentialError, CredentialStore, OrderStore, RepositoryError, SubmissionStore,
};
pub use scheduler::{PollScheduler, PollSchedulerConfig, SchedulerError, TickReport};
pub use service::{CreateOrdersRequest, OrderSettings, ScreeningOrderService, ServiceError};
pub use vendor::{
    parse_result_webhook, parse_status_webhook, HttpVendorClient, OrderRequest, ProtocolError,
    StatusResult, SubmitReceipt, VendorClient, WebhookEvent, WebhookKind,
};
pub use webhook::{webhook_router, NotHandledReason, WebhookOutcome, WebhookReceiver};
