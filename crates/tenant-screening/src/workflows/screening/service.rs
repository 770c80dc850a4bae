use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::aggregate::AggregateStatusDeriver;
use super::clock::Clock;
use super::credentials::{CredentialResolutionError, CredentialResolver};
use super::domain::{
    Applicant, CallbackUrls, Invitation, OrderId, ReferenceNumber, ScreeningOrder,
    ScreeningStatus, SubmissionId, VendorCredentials,
};
use super::reconcile::instant_after;
use super::repository::{OrderStore, RepositoryError, SubmissionStore};
use super::vendor::{OrderRequest, ProtocolError, VendorClient};
use super::webhook::{RESULT_WEBHOOK_PATH, STATUS_WEBHOOK_PATH};

const REFERENCE_ATTEMPTS: usize = 3;

/// Settings applied to newly created orders.
#[derive(Debug, Clone)]
pub struct OrderSettings {
    /// Externally reachable base URL of this service, used for vendor callbacks.
    pub public_base_url: String,
    pub webhook_secret: String,
    /// Delay before the first poll once the vendor accepted an order.
    pub check_interval: Duration,
    /// How long after creation an order stays eligible for polling.
    pub poll_window: Duration,
}

/// Request to screen every applicant of a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrdersRequest {
    pub submission_id: SubmissionId,
    pub applicants: Vec<Applicant>,
    #[serde(default)]
    pub invitation_id: Option<String>,
}

/// Creates orders, hands them to the vendor and exposes the vendor's account operations.
pub struct ScreeningOrderService<O, S> {
    orders: Arc<O>,
    deriver: AggregateStatusDeriver<O, S>,
    credentials: CredentialResolver<S>,
    vendor: Arc<dyn VendorClient>,
    clock: Arc<dyn Clock>,
    settings: OrderSettings,
}

impl<O, S> ScreeningOrderService<O, S>
where
    O: OrderStore + 'static,
    S: SubmissionStore + 'static,
{
    pub fn new(
        orders: Arc<O>,
        submissions: Arc<S>,
        credentials: CredentialResolver<S>,
        vendor: Arc<dyn VendorClient>,
        clock: Arc<dyn Clock>,
        settings: OrderSettings,
    ) -> Self {
        let deriver = AggregateStatusDeriver::new(Arc::clone(&orders), submissions);
        Self {
            orders,
            deriver,
            credentials,
            vendor,
            clock,
            settings,
        }
    }

    /// Callback URLs with the shared-secret token appended.
    pub fn callback_urls(&self) -> Result<CallbackUrls, ServiceError> {
        let base = self.settings.public_base_url.trim_end_matches('/');
        let build = |path: &str| -> Result<String, ServiceError> {
            let mut url = Url::parse(&format!("{base}{path}"))
                .map_err(|err| ServiceError::InvalidCallbackUrl(err.to_string()))?;
            url.query_pairs_mut()
                .append_pair("token", &self.settings.webhook_secret);
            Ok(url.into())
        };

        Ok(CallbackUrls {
            status_url: build(STATUS_WEBHOOK_PATH)?,
            result_url: build(RESULT_WEBHOOK_PATH)?,
        })
    }

    /// Create one order per applicant and submit each to the vendor.
    ///
    /// Vendor rejections do not fail the call; they leave the affected order in `error`.
    pub async fn create_orders(
        &self,
        request: CreateOrdersRequest,
    ) -> Result<Vec<ScreeningOrder>, ServiceError> {
        if request.applicants.is_empty() {
            return Err(ServiceError::NoApplicants);
        }

        // Resolved up front so a missing account never leaves unsent orders behind.
        let callbacks = self.callback_urls()?;
        let credentials = self.credentials.resolve(&request.submission_id)?;

        let mut submitted = Vec::with_capacity(request.applicants.len());
        for (index, applicant) in request.applicants.iter().enumerate() {
            let order = self.insert_order(
                &request.submission_id,
                applicant,
                index + 1,
                request.invitation_id.clone(),
            )?;
            submitted.push(self.send(order, applicant, &callbacks, &credentials).await?);
        }

        Ok(submitted)
    }

    fn insert_order(
        &self,
        submission_id: &SubmissionId,
        applicant: &Applicant,
        slot: usize,
        invitation_id: Option<String>,
    ) -> Result<ScreeningOrder, ServiceError> {
        let now = self.clock.now();
        let poll_until = Some(instant_after(now, self.settings.poll_window));

        let mut last_error = RepositoryError::Conflict;
        for _ in 0..REFERENCE_ATTEMPTS {
            let order = ScreeningOrder::new(
                submission_id.clone(),
                applicant.person_id.clone(),
                ReferenceNumber::generate(slot),
                invitation_id.clone(),
                now,
                poll_until,
            );
            match self.orders.insert(order) {
                Ok(stored) => {
                    info!(
                        %submission_id,
                        order_id = %stored.id,
                        reference = %stored.reference_number,
                        "created screening order"
                    );
                    return Ok(stored);
                }
                Err(RepositoryError::Conflict) => continue,
                Err(err) => {
                    last_error = err;
                    break;
                }
            }
        }

        Err(ServiceError::Repository(last_error))
    }

    /// Send a `not_sent` order to the vendor.
    pub async fn submit_order(
        &self,
        order_id: &OrderId,
        applicant: &Applicant,
    ) -> Result<ScreeningOrder, ServiceError> {
        let order = self.get(order_id)?;
        if order.status != ScreeningStatus::NotSent {
            return Err(ServiceError::AlreadySubmitted(order.reference_number));
        }
        if order.person_id != applicant.person_id {
            return Err(ServiceError::ApplicantMismatch);
        }

        let callbacks = self.callback_urls()?;
        let credentials = self.credentials.resolve(&order.submission_id)?;
        self.send(order, applicant, &callbacks, &credentials).await
    }

    async fn send(
        &self,
        mut order: ScreeningOrder,
        applicant: &Applicant,
        callbacks: &CallbackUrls,
        credentials: &VendorCredentials,
    ) -> Result<ScreeningOrder, ServiceError> {
        let request = OrderRequest {
            applicant,
            reference_number: &order.reference_number,
            callbacks,
            invitation_id: order.invitation_id.as_deref(),
        };

        let outcome = self
            .vendor
            .submit_screening_request(request, credentials)
            .await;
        let now = self.clock.now();

        match outcome {
            Ok(receipt) => {
                order.set_status(ScreeningStatus::Sent);
                order.raw_status_xml = Some(receipt.raw_xml);
                order.next_status_check_at = Some(instant_after(now, self.settings.check_interval));
                info!(reference = %order.reference_number, "vendor accepted screening order");
            }
            Err(err) => {
                warn!(reference = %order.reference_number, error = %err, "vendor did not accept screening order");
                order.mark_error(format!("order submission failed: {err}"));
            }
        }

        self.orders.update(order.clone())?;
        self.deriver.derive(&order.submission_id);
        Ok(order)
    }

    pub fn get(&self, order_id: &OrderId) -> Result<ScreeningOrder, ServiceError> {
        self.orders
            .fetch(order_id)?
            .ok_or(ServiceError::Repository(RepositoryError::NotFound))
    }

    pub async fn verify_credentials(
        &self,
        credentials: &VendorCredentials,
    ) -> Result<(), ServiceError> {
        self.vendor.verify_credentials(credentials).await?;
        Ok(())
    }

    /// Packages available to the given account, or to the system default account.
    pub async fn list_invitations(
        &self,
        credentials: Option<&VendorCredentials>,
    ) -> Result<Vec<Invitation>, ServiceError> {
        let credentials = credentials
            .or_else(|| self.credentials.default_credentials())
            .ok_or(ServiceError::Credentials(
                CredentialResolutionError::NoneAvailable,
            ))?;
        Ok(self.vendor.retrieve_invitations(credentials).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("at least one applicant is required")]
    NoApplicants,
    #[error("order {0} was already submitted")]
    AlreadySubmitted(ReferenceNumber),
    #[error("applicant does not match the order")]
    ApplicantMismatch,
    #[error("invalid callback URL: {0}")]
    InvalidCallbackUrl(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Credentials(#[from] CredentialResolutionError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
