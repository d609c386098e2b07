//! Canonical Entity Model
//!
//! The normalized civic entities persisted by the store, plus the run-side
//! records (scraping runs, data-quality issues, loading sessions) that the
//! orchestration layer writes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Kind of jurisdiction a source belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JurisdictionKind {
    Federal,
    Provincial,
    Municipal,
    Civic,
}

impl JurisdictionKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Federal => "federal",
            Self::Provincial => "provincial",
            Self::Municipal => "municipal",
            Self::Civic => "civic",
        }
    }
}

/// Jurisdiction (federal, provincial/territorial, municipal, or civic unit)
///
/// The `code` is immutable once created; everything else may be updated by
/// later registry loads. Jurisdictions are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Jurisdiction {
    pub id: i64,
    pub kind: JurisdictionKind,

    /// Stable code, e.g. "ca" (federal), "ca-on", "ca-on-toronto"
    pub code: String,

    pub name: String,

    /// Parent jurisdiction code (municipal rows point at their province)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_code: Option<String>,

    /// OCD division identifier when the source declares one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub division_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

/// Role tag for an elected representative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RepresentativeRole {
    Mp,
    Senator,
    Mpp,
    Mla,
    Mna,
    Premier,
    Mayor,
    Councillor,
    RegionalCouncillor,
    Other,
}

impl RepresentativeRole {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp => "mp",
            Self::Senator => "senator",
            Self::Mpp => "mpp",
            Self::Mla => "mla",
            Self::Mna => "mna",
            Self::Premier => "premier",
            Self::Mayor => "mayor",
            Self::Councillor => "councillor",
            Self::RegionalCouncillor => "regional_councillor",
            Self::Other => "other",
        }
    }
}

/// Elected representative
///
/// Identity is (jurisdiction, external_id) where external_id is the source's
/// stable key. Rows are soft-deleted (marked inactive) once a configurable
/// number of consecutive runs stops observing them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Representative {
    pub id: i64,
    pub jurisdiction_id: i64,

    /// Source-stable identifier within the jurisdiction
    pub external_id: String,

    pub given_name: String,
    pub family_name: String,
    pub role: RepresentativeRole,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub office_address: Option<String>,

    /// JSON array of social/profile URLs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub social_urls: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub biography: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub term_start: Option<NaiveDate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub term_end: Option<NaiveDate>,

    pub active: bool,

    /// Consecutive runs that did not observe this row; drives soft-delete
    pub missed_runs: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Representative {
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.given_name, self.family_name)
    }
}

/// Lifecycle status of a bill
///
/// The declared progression is forward-only; a reverse transition is only
/// possible through an admin override recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum BillStatus {
    Introduced,
    FirstReading,
    SecondReading,
    Committee,
    ThirdReading,
    Passed,
    RoyalAssent,
    Failed,
    Withdrawn,
}

impl BillStatus {
    /// Position along the declared progression. Terminal outcomes (passed,
    /// royal assent, failed, withdrawn) share the top rank so that e.g.
    /// failed does not "advance" to passed.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Introduced => 0,
            Self::FirstReading => 1,
            Self::SecondReading => 2,
            Self::Committee => 3,
            Self::ThirdReading => 4,
            Self::Passed | Self::RoyalAssent | Self::Failed | Self::Withdrawn => 5,
        }
    }

    /// Whether moving from `self` to `next` follows the progression
    #[must_use]
    pub fn allows_transition_to(&self, next: BillStatus) -> bool {
        if *self == next {
            return true;
        }
        // Royal assent strictly follows passed; the other terminal states
        // are unordered among themselves.
        if *self == Self::Passed && next == Self::RoyalAssent {
            return true;
        }
        if self.rank() == 5 && next.rank() == 5 {
            return false;
        }
        next.rank() > self.rank()
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Introduced => "introduced",
            Self::FirstReading => "first_reading",
            Self::SecondReading => "second_reading",
            Self::Committee => "committee",
            Self::ThirdReading => "third_reading",
            Self::Passed => "passed",
            Self::RoyalAssent => "royal_assent",
            Self::Failed => "failed",
            Self::Withdrawn => "withdrawn",
        }
    }
}

/// Legislative bill
///
/// Identity is (jurisdiction, bill_number, session).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bill {
    pub id: i64,
    pub jurisdiction_id: i64,

    /// e.g. "C-11" federally; free-form for municipal by-laws
    pub bill_number: String,

    /// Legislative session label, e.g. "44-1"
    pub session: String,

    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,

    pub status: BillStatus,

    /// JSON object mapping status name to ISO date of the transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_dates: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Committee, identified by (jurisdiction, name)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Committee {
    pub id: i64,
    pub jurisdiction_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Category of a parliamentary or municipal event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EventCategory {
    Meeting,
    Vote,
    Reading,
    CommitteeMeeting,
    Other,
}

/// Event, identified by (jurisdiction, external_id)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: i64,
    pub jurisdiction_id: i64,
    pub external_id: String,
    pub category: EventCategory,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    pub event_date: NaiveDate,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bill_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub committee_id: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a representative voted on an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum VoteResult {
    Yes,
    No,
    Abstain,
    Absent,
}

/// One representative's vote on one event
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Vote {
    pub id: i64,
    pub event_id: i64,
    pub representative_id: i64,
    pub result: VoteResult,
}

/// Bill sponsorship link
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Sponsorship {
    pub id: i64,
    pub bill_id: i64,
    pub representative_id: i64,
    pub is_primary: bool,
}

/// Committee membership link with role and date range
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub id: i64,
    pub committee_id: i64,
    pub representative_id: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

/// Scraper category, ordered by dispatch priority
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Category {
    Parliamentary,
    Provincial,
    Municipal,
    Civic,
    Update,
}

impl Category {
    /// Tie-break rank used by the executor queue (lower runs first)
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Parliamentary => 0,
            Self::Provincial => 1,
            Self::Municipal => 2,
            Self::Civic => 3,
            Self::Update => 4,
        }
    }

    /// Default concurrency cap for the category
    #[must_use]
    pub fn default_concurrency(&self) -> usize {
        match self {
            Self::Parliamentary => 2,
            Self::Provincial => 8,
            Self::Municipal => 20,
            Self::Civic => 4,
            Self::Update => 4,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parliamentary => "parliamentary",
            Self::Provincial => "provincial",
            Self::Municipal => "municipal",
            Self::Civic => "civic",
            Self::Update => "update",
        }
    }

    #[must_use]
    pub fn all() -> [Category; 5] {
        [
            Self::Parliamentary,
            Self::Provincial,
            Self::Municipal,
            Self::Civic,
            Self::Update,
        ]
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parliamentary" => Ok(Self::Parliamentary),
            "provincial" => Ok(Self::Provincial),
            "municipal" => Ok(Self::Municipal),
            "civic" => Ok(Self::Civic),
            "update" => Ok(Self::Update),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// Status of a single scraping run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
    Skipped,
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One invocation of one scraper against one source
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScrapingRun {
    /// UUID string
    pub id: String,

    pub scraper_id: String,
    pub jurisdiction_code: String,
    pub category: Category,
    pub status: RunStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    pub records_found: i64,
    pub records_new: i64,
    pub records_updated: i64,
    pub errors_count: i64,

    /// JSON array of structured error entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_log: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ScrapingRun {
    /// Fresh pending run for a scraper
    #[must_use]
    pub fn pending(scraper_id: &str, jurisdiction_code: &str, category: Category) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            scraper_id: scraper_id.to_string(),
            jurisdiction_code: jurisdiction_code.to_string(),
            category,
            status: RunStatus::Pending,
            started_at: None,
            ended_at: None,
            records_found: 0,
            records_new: 0,
            records_updated: 0,
            errors_count: 0,
            error_log: None,
            summary: None,
        }
    }
}

/// Severity of a data-quality observation
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum IssueSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl IssueSeverity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

/// Enumerated kind of a data-quality observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum IssueKind {
    MissingRequiredField,
    MalformedIdentifier,
    StaleRecord,
    DuplicateCollision,
    UnknownClassification,
    InvalidUrl,
    AmbiguousDivision,
    AmbiguousDate,
    BudgetExhausted,
    TransientIoRecovered,
    PersistenceFailure,
    TimeoutOrphan,
    ScraperFailure,
}

impl IssueKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingRequiredField => "missing_required_field",
            Self::MalformedIdentifier => "malformed_identifier",
            Self::StaleRecord => "stale_record",
            Self::DuplicateCollision => "duplicate_collision",
            Self::UnknownClassification => "unknown_classification",
            Self::InvalidUrl => "invalid_url",
            Self::AmbiguousDivision => "ambiguous_division",
            Self::AmbiguousDate => "ambiguous_date",
            Self::BudgetExhausted => "budget_exhausted",
            Self::TransientIoRecovered => "transient_io_recovered",
            Self::PersistenceFailure => "persistence_failure",
            Self::TimeoutOrphan => "timeout_orphan",
            Self::ScraperFailure => "scraper_failure",
        }
    }
}

/// Structured observation about a record or run that did not abort
/// processing but should be reviewed
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DataQualityIssue {
    /// UUID string
    pub id: String,

    /// Run that produced the observation, when there was one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    pub severity: IssueSeverity,
    pub kind: IssueKind,
    pub description: String,

    /// "entity_type:natural_key" reference to the affected row
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_ref: Option<String>,

    pub detected_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl DataQualityIssue {
    #[must_use]
    pub fn new(kind: IssueKind, severity: IssueSeverity, description: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: None,
            severity,
            kind,
            description: description.into(),
            entity_ref: None,
            detected_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[must_use]
    pub fn for_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    #[must_use]
    pub fn for_entity(mut self, entity_ref: impl Into<String>) -> Self {
        self.entity_ref = Some(entity_ref.into());
        self
    }
}

/// Loading strategy for a phased session
///
/// Scales per-run timeouts and retry budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Strategy {
    Conservative,
    Balanced,
    Aggressive,
}

impl Strategy {
    /// Multiplier applied to per-run timeouts
    #[must_use]
    pub fn timeout_multiplier(&self) -> f64 {
        match self {
            Self::Conservative => 1.5,
            Self::Balanced => 1.0,
            Self::Aggressive => 0.7,
        }
    }

    /// Retry attempts given a configured baseline
    #[must_use]
    pub fn retry_attempts(&self, base: u32) -> u32 {
        match self {
            Self::Conservative => base + 1,
            Self::Balanced => base,
            Self::Aggressive => base.saturating_sub(1).max(1),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Balanced => "balanced",
            Self::Aggressive => "aggressive",
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conservative" => Ok(Self::Conservative),
            "balanced" => Ok(Self::Balanced),
            "aggressive" => Ok(Self::Aggressive),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Balanced
    }
}

/// Ordered phases of a loading session
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PhaseKind {
    Preparation,
    FederalCore,
    ProvincialTier1,
    ProvincialTier2,
    MunicipalMajor,
    MunicipalMinor,
    Validation,
}

impl PhaseKind {
    /// Declared execution order
    #[must_use]
    pub fn sequence() -> [PhaseKind; 7] {
        [
            Self::Preparation,
            Self::FederalCore,
            Self::ProvincialTier1,
            Self::ProvincialTier2,
            Self::MunicipalMajor,
            Self::MunicipalMinor,
            Self::Validation,
        ]
    }

    /// Next phase in the declared order, None after validation
    #[must_use]
    pub fn next(&self) -> Option<PhaseKind> {
        let seq = Self::sequence();
        let idx = seq.iter().position(|k| k == self)?;
        seq.get(idx + 1).copied()
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparation => "preparation",
            Self::FederalCore => "federal_core",
            Self::ProvincialTier1 => "provincial_tier1",
            Self::ProvincialTier2 => "provincial_tier2",
            Self::MunicipalMajor => "municipal_major",
            Self::MunicipalMinor => "municipal_minor",
            Self::Validation => "validation",
        }
    }
}

/// Status of one phase within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Skipped,
    Cancelled,
    Failed,
}

impl PhaseStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Skipped | Self::Cancelled | Self::Failed
        )
    }
}

/// Durable record of one phase of one loading session
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Phase {
    pub session_id: String,
    pub kind: PhaseKind,
    pub status: PhaseStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// JSON array of scraper ids assigned to the phase
    pub scraper_ids: String,

    /// Fraction of assigned scrapers that reached a terminal status
    pub progress: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<i64>,
}

/// Overall status of a loading session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl SessionStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// One invocation of the phased loader spanning many runs
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LoadingSession {
    /// UUID string
    pub id: String,

    pub strategy: Strategy,
    pub started_by: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}
