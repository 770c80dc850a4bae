use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::screening::domain::{
    Invitation, LandlordId, OrderId, PersonId, ReferenceNumber, ScreeningOrder, ScreeningStatus,
    StoredCredentials, SubmissionId, SubmissionSnapshot, SubmissionStatus, VendorCredentials,
};
use crate::workflows::screening::reconcile::BackoffPolicy;
use crate::workflows::screening::repository::{
    CredentialError, CredentialStore, OrderStore, RepositoryError, SubmissionStore,
};
use crate::workflows::screening::scheduler::PollSchedulerConfig;
use crate::workflows::screening::vendor::{
    OrderRequest, ProtocolError, StatusResult, SubmitReceipt, VendorClient,
};

pub(crate) fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

static REFERENCE_SEQUENCE: AtomicUsize = AtomicUsize::new(1);

pub(crate) fn order_with_status(submission: &str, status: ScreeningStatus) -> ScreeningOrder {
    let sequence = REFERENCE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let mut order = ScreeningOrder::new(
        SubmissionId(submission.to_string()),
        PersonId(format!("person-{sequence}")),
        ReferenceNumber(format!("LS-TEST{sequence:04}-001")),
        None,
        fixed_now(),
        Some(fixed_now() + chrono::Duration::hours(48)),
    );
    order.status = status;
    order
}

/// Order that is due for a poll at `fixed_now()`.
pub(crate) fn due_order(submission: &str, reference: &str) -> ScreeningOrder {
    let mut order = order_with_status(submission, ScreeningStatus::Sent);
    order.reference_number = ReferenceNumber(reference.to_string());
    order.next_status_check_at = Some(fixed_now());
    order
}

pub(crate) fn backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial_delay: Duration::from_secs(300),
        max_delay: Duration::from_secs(3_600),
        max_consecutive_failures: 5,
    }
}

pub(crate) fn scheduler_config() -> PollSchedulerConfig {
    PollSchedulerConfig {
        tick_interval: Duration::from_secs(60),
        check_interval: Duration::from_secs(3_600),
        backoff: backoff(),
        inter_order_pause: Duration::ZERO,
        batch_limit: 50,
    }
}

pub(crate) fn system_credentials() -> VendorCredentials {
    VendorCredentials {
        username: "system".to_string(),
        password: "system-pass".to_string(),
    }
}

pub(crate) fn landlord_credentials() -> VendorCredentials {
    VendorCredentials {
        username: "landlord-7".to_string(),
        password: "landlord-pass".to_string(),
    }
}

pub(crate) fn in_progress_result() -> StatusResult {
    StatusResult {
        reading: Some(crate::workflows::screening::domain::VendorReading::InProgress),
        status_text: Some("In Progress".to_string()),
        report_id: None,
        report_url: None,
        message: None,
        raw_xml: "<BackgroundReports><Status>In Progress</Status></BackgroundReports>"
            .to_string(),
    }
}

pub(crate) fn complete_result() -> StatusResult {
    StatusResult {
        reading: Some(crate::workflows::screening::domain::VendorReading::Complete),
        status_text: Some("Complete".to_string()),
        report_id: Some("RPT-1".to_string()),
        report_url: Some("https://vendor.test/reports/1".to_string()),
        message: None,
        raw_xml: "<BackgroundReports><ReportId>RPT-1</ReportId></BackgroundReports>".to_string(),
    }
}

#[derive(Default)]
pub(crate) struct MemoryOrders {
    records: Mutex<HashMap<OrderId, ScreeningOrder>>,
    unavailable: AtomicBool,
}

impl MemoryOrders {
    pub(crate) fn seed(&self, order: ScreeningOrder) {
        self.records
            .lock()
            .expect("orders mutex poisoned")
            .insert(order.id.clone(), order);
    }

    pub(crate) fn get(&self, id: &OrderId) -> ScreeningOrder {
        self.records
            .lock()
            .expect("orders mutex poisoned")
            .get(id)
            .cloned()
            .expect("order present")
    }

    pub(crate) fn all(&self) -> Vec<ScreeningOrder> {
        self.records
            .lock()
            .expect("orders mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub(crate) fn go_offline(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RepositoryError::Unavailable("database offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl OrderStore for MemoryOrders {
    fn insert(&self, order: ScreeningOrder) -> Result<ScreeningOrder, RepositoryError> {
        self.check()?;
        let mut guard = self.records.lock().expect("orders mutex poisoned");
        if guard.contains_key(&order.id)
            || guard
                .values()
                .any(|existing| existing.reference_number == order.reference_number)
        {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    fn update(&self, order: ScreeningOrder) -> Result<(), RepositoryError> {
        self.check()?;
        let mut guard = self.records.lock().expect("orders mutex poisoned");
        if !guard.contains_key(&order.id) {
            return Err(RepositoryError::NotFound);
        }
        guard.insert(order.id.clone(), order);
        Ok(())
    }

    fn fetch(&self, id: &OrderId) -> Result<Option<ScreeningOrder>, RepositoryError> {
        self.check()?;
        Ok(self
            .records
            .lock()
            .expect("orders mutex poisoned")
            .get(id)
            .cloned())
    }

    fn find_by_reference(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Option<ScreeningOrder>, RepositoryError> {
        self.check()?;
        Ok(self
            .records
            .lock()
            .expect("orders mutex poisoned")
            .values()
            .find(|order| &order.reference_number == reference)
            .cloned())
    }

    fn for_submission(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<Vec<ScreeningOrder>, RepositoryError> {
        self.check()?;
        Ok(self
            .records
            .lock()
            .expect("orders mutex poisoned")
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
        self.check()?;
        let guard = self.records.lock().expect("orders mutex poisoned");
        let mut due: Vec<ScreeningOrder> = guard
            .values()
            .filter(|order| order.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.next_status_check_at
                .cmp(&b.next_status_check_at)
                .then_with(|| a.reference_number.0.cmp(&b.reference_number.0))
        });
        due.truncate(limit);
        Ok(due)
    }
}

#[derive(Default)]
pub(crate) struct MemorySubmissions {
    records: Mutex<HashMap<SubmissionId, SubmissionSnapshot>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemorySubmissions {
    pub(crate) fn seed(&self, id: &str, status: SubmissionStatus, has_decision: bool) {
        self.seed_with_landlord(id, status, has_decision, None);
    }

    pub(crate) fn seed_with_landlord(
        &self,
        id: &str,
        status: SubmissionStatus,
        has_decision: bool,
        landlord: Option<&str>,
    ) {
        let id = SubmissionId(id.to_string());
        self.records.lock().expect("submissions mutex poisoned").insert(
            id.clone(),
            SubmissionSnapshot {
                id,
                status,
                has_decision,
                landlord_id: landlord.map(|value| LandlordId(value.to_string())),
            },
        );
    }

    pub(crate) fn status_of(&self, id: &str) -> Option<SubmissionStatus> {
        self.records
            .lock()
            .expect("submissions mutex poisoned")
            .get(&SubmissionId(id.to_string()))
            .map(|snapshot| snapshot.status)
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }
}

impl SubmissionStore for MemorySubmissions {
    fn fetch(&self, id: &SubmissionId) -> Result<Option<SubmissionSnapshot>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .expect("submissions mutex poisoned")
            .get(id)
            .cloned())
    }

    fn advance_status(
        &self,
        id: &SubmissionId,
        candidate: SubmissionStatus,
    ) -> Result<Option<SubmissionStatus>, RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("read only".to_string()));
        }
        let mut guard = self.records.lock().expect("submissions mutex poisoned");
        let snapshot = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        let replaced = snapshot.advance_to(candidate);
        if replaced.is_some() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(replaced)
    }
}

/// Credential store keyed by landlord; entries may be marked undecryptable.
#[derive(Default)]
pub(crate) struct MemoryCredentials {
    entries: Mutex<HashMap<LandlordId, Result<StoredCredentials, String>>>,
}

impl MemoryCredentials {
    pub(crate) fn store(&self, landlord: &str, credentials: VendorCredentials, verified: bool) {
        self.entries.lock().expect("credentials mutex poisoned").insert(
            LandlordId(landlord.to_string()),
            Ok(StoredCredentials {
                credentials,
                verified,
            }),
        );
    }

    pub(crate) fn corrupt(&self, landlord: &str) {
        self.entries
            .lock()
            .expect("credentials mutex poisoned")
            .insert(LandlordId(landlord.to_string()), Err("bad ciphertext".to_string()));
    }
}

impl CredentialStore for MemoryCredentials {
    fn resolve(&self, landlord: &LandlordId) -> Result<Option<StoredCredentials>, CredentialError> {
        match self
            .entries
            .lock()
            .expect("credentials mutex poisoned")
            .get(landlord)
        {
            Some(Ok(stored)) => Ok(Some(stored.clone())),
            Some(Err(reason)) => Err(CredentialError::Decryption(reason.clone())),
            None => Ok(None),
        }
    }
}

/// Vendor double that replays scripted status answers and records what it was asked.
#[derive(Default)]
pub(crate) struct ScriptedVendor {
    statuses: Mutex<HashMap<ReferenceNumber, VecDeque<Result<StatusResult, ProtocolError>>>>,
    submit_outcome: Mutex<Option<ProtocolError>>,
    pub(crate) status_calls: Mutex<Vec<(ReferenceNumber, String)>>,
    pub(crate) submissions: Mutex<Vec<(ReferenceNumber, String, String)>>,
}

impl ScriptedVendor {
    pub(crate) fn script(
        &self,
        reference: &str,
        responses: impl IntoIterator<Item = Result<StatusResult, ProtocolError>>,
    ) {
        self.statuses
            .lock()
            .expect("vendor mutex poisoned")
            .entry(ReferenceNumber(reference.to_string()))
            .or_default()
            .extend(responses);
    }

    pub(crate) fn reject_submissions(&self, error: ProtocolError) {
        *self.submit_outcome.lock().expect("vendor mutex poisoned") = Some(error);
    }

    pub(crate) fn status_call_count(&self) -> usize {
        self.status_calls.lock().expect("vendor mutex poisoned").len()
    }

    pub(crate) fn usernames_used(&self) -> Vec<String> {
        self.status_calls
            .lock()
            .expect("vendor mutex poisoned")
            .iter()
            .map(|(_, username)| username.clone())
            .collect()
    }
}

#[async_trait]
impl VendorClient for ScriptedVendor {
    async fn verify_credentials(&self, credentials: &VendorCredentials) -> Result<(), ProtocolError> {
        if credentials.password == "wrong" {
            Err(ProtocolError::Rejected("invalid login".to_string()))
        } else {
            Ok(())
        }
    }

    async fn retrieve_invitations(
        &self,
        _credentials: &VendorCredentials,
    ) -> Result<Vec<Invitation>, ProtocolError> {
        Ok(vec![Invitation {
            id: "PKG-1".to_string(),
            name: "Credit + Criminal".to_string(),
        }])
    }

    async fn submit_screening_request(
        &self,
        request: OrderRequest<'_>,
        credentials: &VendorCredentials,
    ) -> Result<SubmitReceipt, ProtocolError> {
        self.submissions.lock().expect("vendor mutex poisoned").push((
            request.reference_number.clone(),
            credentials.username.clone(),
            request.callbacks.status_url.clone(),
        ));
        if let Some(error) = self.submit_outcome.lock().expect("vendor mutex poisoned").clone() {
            return Err(error);
        }
        Ok(SubmitReceipt {
            message: Some("Order received".to_string()),
            raw_xml: "<BackgroundReports><Status>Received</Status></BackgroundReports>"
                .to_string(),
        })
    }

    async fn check_order_status(
        &self,
        reference: &ReferenceNumber,
        credentials: &VendorCredentials,
    ) -> Result<StatusResult, ProtocolError> {
        self.status_calls
            .lock()
            .expect("vendor mutex poisoned")
            .push((reference.clone(), credentials.username.clone()));
        self.statuses
            .lock()
            .expect("vendor mutex poisoned")
            .get_mut(reference)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(ProtocolError::Transport("connection refused".to_string())))
    }
}

pub(crate) struct Harness {
    pub(crate) orders: Arc<MemoryOrders>,
    pub(crate) submissions: Arc<MemorySubmissions>,
    pub(crate) credentials: Arc<MemoryCredentials>,
    pub(crate) vendor: Arc<ScriptedVendor>,
    pub(crate) clock: Arc<crate::workflows::screening::clock::ManualClock>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self {
            orders: Arc::new(MemoryOrders::default()),
            submissions: Arc::new(MemorySubmissions::default()),
            credentials: Arc::new(MemoryCredentials::default()),
            vendor: Arc::new(ScriptedVendor::default()),
            clock: Arc::new(crate::workflows::screening::clock::ManualClock::new(fixed_now())),
        }
    }

    pub(crate) fn resolver(
        &self,
    ) -> crate::workflows::screening::credentials::CredentialResolver<MemorySubmissions> {
        crate::workflows::screening::credentials::CredentialResolver::new(
            self.submissions.clone(),
            self.credentials.clone(),
            Some(system_credentials()),
        )
    }
}

pub(crate) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 4096)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
