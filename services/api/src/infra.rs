use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tenant_screening::config::AppConfig;
use tenant_screening::workflows::screening::{
    Clock, CredentialError, CredentialResolver, CredentialStore, LandlordId, OrderId,
    OrderStore, PollScheduler, ReferenceNumber, RepositoryError, ScreeningOrder,
    ScreeningOrderService, StoredCredentials, SubmissionId, SubmissionSnapshot,
    SubmissionStatus, SubmissionStore, VendorClient, VendorCredentials, WebhookReceiver,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type OrderService = ScreeningOrderService<InMemoryOrderStore, InMemorySubmissionStore>;
pub(crate) type Scheduler = PollScheduler<InMemoryOrderStore, InMemorySubmissionStore>;
pub(crate) type Receiver = WebhookReceiver<InMemoryOrderStore, InMemorySubmissionStore>;

/// Everything the screening routes need, sharing one set of stores.
pub(crate) struct ScreeningComponents {
    pub(crate) service: OrderService,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) receiver: Arc<Receiver>,
    pub(crate) submissions: Arc<InMemorySubmissionStore>,
    pub(crate) credentials: Arc<InMemoryCredentialStore>,
}

impl ScreeningComponents {
    pub(crate) fn assemble(
        config: &AppConfig,
        vendor: Arc<dyn VendorClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let orders = Arc::new(InMemoryOrderStore::default());
        let submissions = Arc::new(InMemorySubmissionStore::default());
        let credentials = Arc::new(InMemoryCredentialStore::default());
        let resolver = CredentialResolver::new(
            submissions.clone(),
            credentials.clone(),
            config.vendor.default_credentials.clone(),
        );

        let service = ScreeningOrderService::new(
            orders.clone(),
            submissions.clone(),
            resolver.clone(),
            vendor.clone(),
            clock.clone(),
            config.order_settings(),
        );
        let scheduler = Arc::new(PollScheduler::new(
            orders.clone(),
            submissions.clone(),
            resolver,
            vendor,
            clock,
            config.polling.scheduler_config(),
        ));
        let receiver = Arc::new(WebhookReceiver::new(
            orders,
            submissions.clone(),
            config.webhooks.secret.clone(),
        ));

        Self {
            service,
            scheduler,
            receiver,
            submissions,
            credentials,
        }
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryOrderStore {
    records: Arc<Mutex<HashMap<OrderId, ScreeningOrder>>>,
}

impl OrderStore for InMemoryOrderStore {
    fn insert(&self, order: ScreeningOrder) -> Result<ScreeningOrder, RepositoryError> {
        let mut guard = self.records.lock().expect("order store mutex poisoned");
        let duplicate_reference = guard
            .values()
            .any(|existing| existing.reference_number == order.reference_number);
        if guard.contains_key(&order.id) || duplicate_reference {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    fn update(&self, order: ScreeningOrder) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("order store mutex poisoned");
        if guard.contains_key(&order.id) {
            guard.insert(order.id.clone(), order);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn fetch(&self, id: &OrderId) -> Result<Option<ScreeningOrder>, RepositoryError> {
        let guard = self.records.lock().expect("order store mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn find_by_reference(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Option<ScreeningOrder>, RepositoryError> {
        let guard = self.records.lock().expect("order store mutex poisoned");
        Ok(guard
            .values()
            .find(|order| &order.reference_number == reference)
            .cloned())
    }

    fn for_submission(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<Vec<ScreeningOrder>, RepositoryError> {
        let guard = self.records.lock().expect("order store mutex poisoned");
        Ok(guard
            .values()
            .filter(|order| &order.submission_id == submission_id)
            .cloned()
            .collect())
    }

    fn due_for_poll(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScreeningOrder>, RepositoryError> {
        let guard = self.records.lock().expect("order store mutex poisoned");
        let mut due: Vec<ScreeningOrder> = guard
            .values()
            .filter(|order| order.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|order| order.next_status_check_at);
        due.truncate(limit);
        Ok(due)
    }
}

/// Stand-in for the host application's submission table.
#[derive(Default, Clone)]
pub(crate) struct InMemorySubmissionStore {
    records: Arc<Mutex<HashMap<SubmissionId, SubmissionSnapshot>>>,
}

impl InMemorySubmissionStore {
    /// Track a submission the first time orders are requested for it.
    pub(crate) fn register(&self, id: &SubmissionId, landlord_id: Option<LandlordId>) {
        let mut guard = self.records.lock().expect("submission store mutex poisoned");
        let snapshot = guard
            .entry(id.clone())
            .or_insert_with(|| SubmissionSnapshot {
                id: id.clone(),
                status: SubmissionStatus::Submitted,
                has_decision: false,
                landlord_id: None,
            });
        if landlord_id.is_some() {
            snapshot.landlord_id = landlord_id;
        }
    }

    #[cfg(test)]
    pub(crate) fn status_of(&self, id: &SubmissionId) -> Option<SubmissionStatus> {
        let guard = self.records.lock().expect("submission store mutex poisoned");
        guard.get(id).map(|snapshot| snapshot.status)
    }
}

impl SubmissionStore for InMemorySubmissionStore {
    fn fetch(&self, id: &SubmissionId) -> Result<Option<SubmissionSnapshot>, RepositoryError> {
        let guard = self.records.lock().expect("submission store mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn advance_status(
        &self,
        id: &SubmissionId,
        candidate: SubmissionStatus,
    ) -> Result<Option<SubmissionStatus>, RepositoryError> {
        let mut guard = self.records.lock().expect("submission store mutex poisoned");
        let snapshot = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        Ok(snapshot.advance_to(candidate))
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryCredentialStore {
    entries: Arc<Mutex<HashMap<LandlordId, StoredCredentials>>>,
}

impl InMemoryCredentialStore {
    pub(crate) fn store_verified(&self, landlord: LandlordId, credentials: VendorCredentials) {
        let mut guard = self.entries.lock().expect("credential store mutex poisoned");
        guard.insert(
            landlord,
            StoredCredentials {
                credentials,
                verified: true,
            },
        );
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn resolve(&self, landlord: &LandlordId) -> Result<Option<StoredCredentials>, CredentialError> {
        let guard = self.entries.lock().expect("credential store mutex poisoned");
        Ok(guard.get(landlord).cloned())
    }
}
