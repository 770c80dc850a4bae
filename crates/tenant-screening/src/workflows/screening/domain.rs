use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Engine-owned identifier for a screening order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the rental submission that owns one or more orders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionId(pub String);

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the applicant an order screens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersonId(pub String);

/// Identifier of the landlord account whose vendor credentials may be used.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LandlordId(pub String);

/// Correlation key embedded in every vendor request and response for one order.
///
/// Assigned once at creation and never mutated; webhooks locate orders by it alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceNumber(pub String);

impl ReferenceNumber {
    /// Build a reference of the form `LS-1A2B3C4D-001` for the given 1-based applicant slot.
    pub fn generate(applicant_index: usize) -> Self {
        let token = Uuid::new_v4().simple().to_string();
        Self(format!(
            "LS-{}-{:03}",
            token[..8].to_ascii_uppercase(),
            applicant_index
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a single vendor order as tracked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningStatus {
    NotSent,
    Sent,
    InProgress,
    Complete,
    Error,
}

impl ScreeningStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ScreeningStatus::NotSent => "not_sent",
            ScreeningStatus::Sent => "sent",
            ScreeningStatus::InProgress => "in_progress",
            ScreeningStatus::Complete => "complete",
            ScreeningStatus::Error => "error",
        }
    }

    /// Terminal for polling purposes. Webhooks may still refine a complete order.
    pub const fn is_terminal(self) -> bool {
        matches!(self, ScreeningStatus::Complete | ScreeningStatus::Error)
    }
}

impl fmt::Display for ScreeningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Normalized reading of the vendor's free-text status.
///
/// `Invited` and `NotFound` only appear on the poll channel and fold onto
/// [`ScreeningStatus::Sent`]: the vendor knows about the order but has not started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorReading {
    Invited,
    NotFound,
    InProgress,
    Complete,
    Error,
}

impl VendorReading {
    pub const fn as_status(self) -> ScreeningStatus {
        match self {
            VendorReading::Invited | VendorReading::NotFound => ScreeningStatus::Sent,
            VendorReading::InProgress => ScreeningStatus::InProgress,
            VendorReading::Complete => ScreeningStatus::Complete,
            VendorReading::Error => ScreeningStatus::Error,
        }
    }
}

/// One outstanding background check for a single applicant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningOrder {
    pub id: OrderId,
    pub submission_id: SubmissionId,
    pub person_id: PersonId,
    pub reference_number: ReferenceNumber,
    pub invitation_id: Option<String>,
    pub status: ScreeningStatus,
    pub report_id: Option<String>,
    pub report_url: Option<String>,
    pub raw_status_xml: Option<String>,
    pub raw_result_xml: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_status_check_at: Option<DateTime<Utc>>,
    /// `None` means the order is not polled.
    pub next_status_check_at: Option<DateTime<Utc>>,
    pub poll_until: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl ScreeningOrder {
    pub fn new(
        submission_id: SubmissionId,
        person_id: PersonId,
        reference_number: ReferenceNumber,
        invitation_id: Option<String>,
        created_at: DateTime<Utc>,
        poll_until: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: OrderId::generate(),
            submission_id,
            person_id,
            reference_number,
            invitation_id,
            status: ScreeningStatus::NotSent,
            report_id: None,
            report_url: None,
            raw_status_xml: None,
            raw_result_xml: None,
            error_message: None,
            created_at,
            last_status_check_at: None,
            next_status_check_at: None,
            poll_until,
            consecutive_failures: 0,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal()
            && self
                .next_status_check_at
                .map(|due| due <= now)
                .unwrap_or(false)
    }

    /// Apply a status and keep the scheduling invariants: terminal orders are never polled
    /// and only errored orders carry an error message.
    pub fn set_status(&mut self, status: ScreeningStatus) {
        self.status = status;
        if status.is_terminal() {
            self.next_status_check_at = None;
        }
        if status != ScreeningStatus::Error {
            self.error_message = None;
        }
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.set_status(ScreeningStatus::Error);
        self.error_message = Some(message.into());
    }

    /// Overwrite report identifiers only with values that are present.
    pub fn merge_report(&mut self, report_id: Option<&str>, report_url: Option<&str>) {
        if let Some(id) = report_id.filter(|value| !value.is_empty()) {
            self.report_id = Some(id.to_string());
        }
        if let Some(url) = report_url.filter(|value| !value.is_empty()) {
            self.report_url = Some(url.to_string());
        }
    }

    pub fn view(&self) -> OrderView {
        OrderView {
            id: self.id.clone(),
            submission_id: self.submission_id.clone(),
            person_id: self.person_id.clone(),
            reference_number: self.reference_number.clone(),
            status: self.status.label(),
            report_id: self.report_id.clone(),
            report_url: self.report_url.clone(),
            error_message: self.error_message.clone(),
            last_status_check_at: self.last_status_check_at,
            next_status_check_at: self.next_status_check_at,
            consecutive_failures: self.consecutive_failures,
        }
    }
}

/// API-facing projection of an order without the retained vendor payloads.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub id: OrderId,
    pub submission_id: SubmissionId,
    pub person_id: PersonId,
    pub reference_number: ReferenceNumber,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub last_status_check_at: Option<DateTime<Utc>>,
    pub next_status_check_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

/// Aggregate status of a rental submission, ordered by precedence.
///
/// The reconciliation engine only ever moves this value forward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Started,
    Submitted,
    ScreeningRequested,
    InProgress,
    Complete,
}

impl SubmissionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            SubmissionStatus::Started => "started",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::ScreeningRequested => "screening_requested",
            SubmissionStatus::InProgress => "in_progress",
            SubmissionStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the engine needs to know about a submission it does not own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionSnapshot {
    pub id: SubmissionId,
    pub status: SubmissionStatus,
    /// A recorded human decision outranks automated reconciliation.
    pub has_decision: bool,
    pub landlord_id: Option<LandlordId>,
}

impl SubmissionSnapshot {
    /// Move to `candidate` if it is strictly later and no decision is recorded.
    /// Returns the status it replaced.
    pub fn advance_to(&mut self, candidate: SubmissionStatus) -> Option<SubmissionStatus> {
        if self.has_decision || candidate <= self.status {
            return None;
        }
        Some(std::mem::replace(&mut self.status, candidate))
    }
}

/// Applicant identity fields sent with an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applicant {
    pub person_id: PersonId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
}

/// Username/password pair for the vendor's authentication block.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for VendorCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Decrypted per-landlord credentials as stored by the account owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredentials {
    pub credentials: VendorCredentials,
    /// Set once an `AuthOnly` check has succeeded for these credentials.
    pub verified: bool,
}

/// Selectable screening package offered by the vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: String,
    pub name: String,
}

/// Callback URLs handed to the vendor with each order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackUrls {
    pub status_url: String,
    pub result_url: String,
}
