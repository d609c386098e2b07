//! Normalizer
//!
//! Maps loose raw records into canonical entities, tolerating the shape
//! drift real sources exhibit (string-or-object fields, free-form roles,
//! sloppy dates). Problems that do not abort processing become
//! data-quality issues attached to the output.

pub mod dates;
pub mod names;
pub mod raw;

pub use raw::RawField;

use crate::core::model::{
    Bill, BillStatus, Committee, DataQualityIssue, EventCategory, IssueKind, IssueSeverity,
    JurisdictionKind, Representative, RepresentativeRole, VoteResult,
};
use crate::core::scrapers::{RawKind, RawRecord};
use chrono::{NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FEDERAL_BILL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[CS]-\d+$").expect("valid regex"));
static PROVINCIAL_BILL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:Bill\s+)?\d+[A-Za-z]?$").expect("valid regex"));

/// Event with its references still expressed as source keys
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub external_id: String,
    pub category: EventCategory,
    pub title: Option<String>,
    pub event_date: NaiveDate,
    pub bill_number: Option<String>,
    pub bill_session: Option<String>,
    pub committee_name: Option<String>,
}

/// Vote with its references still expressed as source keys
#[derive(Debug, Clone, PartialEq)]
pub struct VoteDraft {
    pub event_external_id: String,
    pub representative_external_id: String,
    pub result: VoteResult,
}

/// Sponsorship link by source keys
#[derive(Debug, Clone, PartialEq)]
pub struct SponsorshipDraft {
    pub bill_number: String,
    pub session: String,
    pub representative_external_id: String,
    pub is_primary: bool,
}

/// Committee membership link by source keys
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipDraft {
    pub committee_name: String,
    pub representative_external_id: String,
    pub role: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// One canonical entity ready for the ingestion pipeline
#[derive(Debug, Clone)]
pub enum CanonicalEntity {
    Representative(Representative),
    Bill(Bill),
    Committee(Committee),
    Event(EventDraft),
    Vote(VoteDraft),
    Sponsorship(SponsorshipDraft),
    Membership(MembershipDraft),
}

/// Result of normalizing one raw record
#[derive(Debug, Default)]
pub struct NormalizedOutput {
    pub entities: Vec<CanonicalEntity>,
    pub issues: Vec<DataQualityIssue>,
}

/// Raw-to-canonical mapper for one jurisdiction
pub struct Normalizer {
    jurisdiction_code: String,
    jurisdiction_kind: JurisdictionKind,
}

impl Normalizer {
    #[must_use]
    pub fn new(jurisdiction_code: impl Into<String>, kind: JurisdictionKind) -> Self {
        Self {
            jurisdiction_code: jurisdiction_code.into(),
            jurisdiction_kind: kind,
        }
    }

    /// Normalize one raw record into zero or more canonical entities
    #[must_use]
    pub fn normalize(&self, record: &RawRecord) -> NormalizedOutput {
        match record.kind {
            RawKind::Person => self.normalize_person(record),
            RawKind::Bill => self.normalize_bill(record),
            RawKind::Committee => self.normalize_committee(record),
            RawKind::Event => self.normalize_event(record),
            RawKind::Vote => self.normalize_vote(record),
            // the runner already flagged unknown records
            RawKind::Unknown => NormalizedOutput::default(),
        }
    }

    fn normalize_person(&self, record: &RawRecord) -> NormalizedOutput {
        let mut output = NormalizedOutput::default();

        let (given_name, family_name) = match self.person_name(record) {
            Some(parts) => parts,
            None => {
                output.issues.push(
                    DataQualityIssue::new(
                        IssueKind::MissingRequiredField,
                        IssueSeverity::Error,
                        format!(
                            "person record from {} has no usable name",
                            self.jurisdiction_code
                        ),
                    ),
                );
                return output;
            }
        };

        let external_id = record
            .str_field("external_id")
            .or_else(|| record.str_field("id"))
            .map(ToString::to_string)
            .unwrap_or_else(|| slug(&format!("{given_name} {family_name}")));
        let entity_ref = format!("representative:{}/{external_id}", self.jurisdiction_code);

        let district = self.field_name(record, &["district", "division"], &mut output, &entity_ref);
        let party = self.field_name(record, &["party"], &mut output, &entity_ref);

        let role = match self.raw_field(record, &["role", "classification"]) {
            Some(field) => {
                let raw_role = field.name().unwrap_or("").to_string();
                let (role, known) = self.map_role(&raw_role);
                if !known {
                    output.issues.push(
                        DataQualityIssue::new(
                            IssueKind::UnknownClassification,
                            IssueSeverity::Info,
                            format!("unrecognized role {raw_role:?}, mapped to other"),
                        )
                        .for_entity(entity_ref.clone()),
                    );
                }
                role
            }
            None => self.default_role(),
        };

        let photo_url = record
            .str_field("photo_url")
            .and_then(|u| self.clean_url(u, &mut output, &entity_ref));

        let social_urls = record.fields.get("links").and_then(Value::as_array).map(|links| {
            let valid: Vec<String> = links
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|u| self.clean_url(u, &mut output, &entity_ref))
                .collect();
            serde_json::to_string(&valid).unwrap_or_else(|_| "[]".to_string())
        });

        let term_start = self.parse_date_field(record, "term_start", &mut output, &entity_ref);
        let term_end = self.parse_date_field(record, "term_end", &mut output, &entity_ref);

        output
            .entities
            .push(CanonicalEntity::Representative(Representative {
                id: 0,
                jurisdiction_id: 0,
                external_id,
                given_name,
                family_name,
                role,
                party,
                district,
                email: record.str_field("email").map(|s| s.trim().to_string()),
                phone: record
                    .str_field("phone")
                    .or_else(|| record.str_field("telephone"))
                    .map(|s| s.trim().to_string()),
                office_address: record
                    .str_field("office_address")
                    .or_else(|| record.str_field("office"))
                    .map(|s| s.trim().to_string()),
                social_urls,
                photo_url,
                biography: record.str_field("biography").map(ToString::to_string),
                term_start,
                term_end,
                active: true,
                missed_runs: 0,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }));

        output
    }

    fn normalize_bill(&self, record: &RawRecord) -> NormalizedOutput {
        let mut output = NormalizedOutput::default();

        let Some(bill_number) = record
            .str_field("number")
            .or_else(|| record.str_field("bill_number"))
            .or_else(|| record.str_field("identifier"))
            .map(|s| s.trim().to_string())
        else {
            output.issues.push(DataQualityIssue::new(
                IssueKind::MissingRequiredField,
                IssueSeverity::Error,
                format!(
                    "bill record from {} has no bill number",
                    self.jurisdiction_code
                ),
            ));
            return output;
        };

        let Some(title) = record.str_field("title").map(|s| s.trim().to_string()) else {
            output.issues.push(DataQualityIssue::new(
                IssueKind::MissingRequiredField,
                IssueSeverity::Error,
                format!(
                    "bill {bill_number} from {} has no title",
                    self.jurisdiction_code
                ),
            ));
            return output;
        };

        let session = match self.raw_field(record, &["session", "legislative_session"]) {
            Some(field) => field.name().unwrap_or("unknown").to_string(),
            None => {
                output.issues.push(DataQualityIssue::new(
                    IssueKind::MissingRequiredField,
                    IssueSeverity::Warning,
                    format!(
                        "bill {bill_number} from {} declares no session",
                        self.jurisdiction_code
                    ),
                ));
                "unknown".to_string()
            }
        };
        let entity_ref = format!(
            "bill:{}/{bill_number}/{session}",
            self.jurisdiction_code
        );

        if let Some(pattern) = self.bill_number_pattern() {
            if !pattern.is_match(&bill_number) {
                output.issues.push(
                    DataQualityIssue::new(
                        IssueKind::MalformedIdentifier,
                        IssueSeverity::Warning,
                        format!(
                            "bill number {bill_number:?} does not match the {} pattern",
                            self.jurisdiction_kind.as_str()
                        ),
                    )
                    .for_entity(entity_ref.clone()),
                );
            }
        }

        let status = match record.str_field("status") {
            Some(raw_status) => match map_bill_status(raw_status) {
                Some(status) => status,
                None => {
                    output.issues.push(
                        DataQualityIssue::new(
                            IssueKind::UnknownClassification,
                            IssueSeverity::Info,
                            format!("unrecognized bill status {raw_status:?}, kept as introduced"),
                        )
                        .for_entity(entity_ref.clone()),
                    );
                    BillStatus::Introduced
                }
            },
            None => BillStatus::Introduced,
        };

        // a sponsor reference becomes a separate link entity
        if let Some(field) = self.raw_field(record, &["sponsor", "primary_sponsor"]) {
            let sponsor_id = match &field {
                RawField::Structured(map) => map
                    .get("external_id")
                    .or_else(|| map.get("id"))
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
                    .or_else(|| field.name().map(slug)),
                RawField::Bare(name) => Some(slug(name)),
            };
            if let Some(representative_external_id) = sponsor_id {
                output.entities.push(CanonicalEntity::Sponsorship(SponsorshipDraft {
                    bill_number: bill_number.clone(),
                    session: session.clone(),
                    representative_external_id,
                    is_primary: true,
                }));
            }
        }

        output.entities.insert(
            0,
            CanonicalEntity::Bill(Bill {
                id: 0,
                jurisdiction_id: 0,
                bill_number,
                session,
                title,
                summary: record.str_field("summary").map(ToString::to_string),
                full_text: record.str_field("full_text").map(ToString::to_string),
                status,
                status_dates: record
                    .fields
                    .get("status_dates")
                    .filter(|v| v.is_object())
                    .map(ToString::to_string),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }),
        );

        output
    }

    fn normalize_committee(&self, record: &RawRecord) -> NormalizedOutput {
        let mut output = NormalizedOutput::default();

        let Some(name) = record.str_field("name").map(names::clean_name) else {
            output.issues.push(DataQualityIssue::new(
                IssueKind::MissingRequiredField,
                IssueSeverity::Error,
                format!(
                    "committee record from {} has no name",
                    self.jurisdiction_code
                ),
            ));
            return output;
        };

        let committee_name = name.clone();
        output.entities.push(CanonicalEntity::Committee(Committee {
            id: 0,
            jurisdiction_id: 0,
            name,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }));

        // member references become membership links
        if let Some(members) = record.fields.get("members").and_then(Value::as_array) {
            for member in members {
                let Some(field) = RawField::from_value(member) else {
                    continue;
                };
                let external_id = match &field {
                    RawField::Structured(map) => map
                        .get("external_id")
                        .or_else(|| map.get("id"))
                        .and_then(Value::as_str)
                        .map(ToString::to_string)
                        .or_else(|| field.name().map(slug)),
                    RawField::Bare(name) => Some(slug(name)),
                };
                let role = match &field {
                    RawField::Structured(map) => {
                        map.get("role").and_then(Value::as_str).map(ToString::to_string)
                    }
                    RawField::Bare(_) => None,
                };
                if let Some(representative_external_id) = external_id {
                    output.entities.push(CanonicalEntity::Membership(MembershipDraft {
                        committee_name: committee_name.clone(),
                        representative_external_id,
                        role,
                        start_date: None,
                        end_date: None,
                    }));
                }
            }
        }

        output
    }

    fn normalize_event(&self, record: &RawRecord) -> NormalizedOutput {
        let mut output = NormalizedOutput::default();

        let Some(external_id) = record
            .str_field("external_id")
            .or_else(|| record.str_field("id"))
            .map(ToString::to_string)
        else {
            output.issues.push(DataQualityIssue::new(
                IssueKind::MissingRequiredField,
                IssueSeverity::Error,
                format!("event record from {} has no id", self.jurisdiction_code),
            ));
            return output;
        };
        let entity_ref = format!("event:{}/{external_id}", self.jurisdiction_code);

        let Some(event_date) = record
            .str_field("date")
            .or_else(|| record.str_field("event_date"))
            .and_then(dates::parse_date)
        else {
            output.issues.push(
                DataQualityIssue::new(
                    IssueKind::MissingRequiredField,
                    IssueSeverity::Error,
                    format!("event {external_id} has no parseable date"),
                )
                .for_entity(entity_ref),
            );
            return output;
        };
        if event_date.assumed_midyear {
            output.issues.push(
                DataQualityIssue::new(
                    IssueKind::AmbiguousDate,
                    IssueSeverity::Info,
                    format!("event {external_id} declared a year-only date; assumed July 1"),
                )
                .for_entity(format!("event:{}/{external_id}", self.jurisdiction_code)),
            );
        }

        let category = match record.str_field("category").or_else(|| record.str_field("kind")) {
            Some(raw) => match map_event_category(raw) {
                Some(category) => category,
                None => {
                    output.issues.push(DataQualityIssue::new(
                        IssueKind::UnknownClassification,
                        IssueSeverity::Info,
                        format!("unrecognized event category {raw:?}, mapped to other"),
                    ));
                    EventCategory::Other
                }
            },
            None => EventCategory::Other,
        };

        let committee_name = self
            .raw_field(record, &["committee"])
            .and_then(|f| f.name().map(names::clean_name));

        output.entities.push(CanonicalEntity::Event(EventDraft {
            external_id,
            category,
            title: record.str_field("title").map(|s| s.trim().to_string()),
            event_date: event_date.date,
            bill_number: record.str_field("bill_number").map(ToString::to_string),
            bill_session: record.str_field("bill_session").map(ToString::to_string),
            committee_name,
        }));

        output
    }

    fn normalize_vote(&self, record: &RawRecord) -> NormalizedOutput {
        let mut output = NormalizedOutput::default();

        let event = record
            .str_field("event_external_id")
            .or_else(|| record.str_field("event_id"));
        let voter = record
            .str_field("representative_external_id")
            .or_else(|| record.str_field("voter_id"));

        let (Some(event_external_id), Some(representative_external_id)) = (event, voter) else {
            output.issues.push(DataQualityIssue::new(
                IssueKind::MissingRequiredField,
                IssueSeverity::Error,
                format!(
                    "vote record from {} is missing its event or voter reference",
                    self.jurisdiction_code
                ),
            ));
            return output;
        };

        let raw_result = record.str_field("result").unwrap_or("");
        let Some(result) = map_vote_result(raw_result) else {
            output.issues.push(DataQualityIssue::new(
                IssueKind::UnknownClassification,
                IssueSeverity::Warning,
                format!("unrecognized vote result {raw_result:?}, record dropped"),
            ));
            return output;
        };

        output.entities.push(CanonicalEntity::Vote(VoteDraft {
            event_external_id: event_external_id.to_string(),
            representative_external_id: representative_external_id.to_string(),
            result,
        }));

        output
    }

    /// First present field among `keys`, as a tagged raw field
    fn raw_field(&self, record: &RawRecord, keys: &[&str]) -> Option<RawField> {
        keys.iter()
            .find_map(|key| record.fields.get(*key))
            .and_then(RawField::from_value)
    }

    /// Resolve a string-or-object field to its name, recording the
    /// coercion when the source used a bare string
    fn field_name(
        &self,
        record: &RawRecord,
        keys: &[&str],
        output: &mut NormalizedOutput,
        entity_ref: &str,
    ) -> Option<String> {
        let field = self.raw_field(record, keys)?;
        if field.is_bare() && (keys.contains(&"division") || keys.contains(&"district")) {
            output.issues.push(
                DataQualityIssue::new(
                    IssueKind::AmbiguousDivision,
                    IssueSeverity::Info,
                    format!(
                        "{} supplied as a bare string; treated as its name",
                        keys[0]
                    ),
                )
                .for_entity(entity_ref.to_string()),
            );
        }
        field.name().map(names::clean_name)
    }

    /// Validate scheme and null invalid URLs
    fn clean_url(
        &self,
        raw: &str,
        output: &mut NormalizedOutput,
        entity_ref: &str,
    ) -> Option<String> {
        match url::Url::parse(raw.trim()) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                Some(parsed.to_string())
            }
            _ => {
                output.issues.push(
                    DataQualityIssue::new(
                        IssueKind::InvalidUrl,
                        IssueSeverity::Warning,
                        format!("invalid URL {raw:?} dropped"),
                    )
                    .for_entity(entity_ref.to_string()),
                );
                None
            }
        }
    }

    fn parse_date_field(
        &self,
        record: &RawRecord,
        key: &str,
        output: &mut NormalizedOutput,
        entity_ref: &str,
    ) -> Option<NaiveDate> {
        let raw = record.str_field(key)?;
        let parsed = dates::parse_date(raw)?;
        if parsed.assumed_midyear {
            output.issues.push(
                DataQualityIssue::new(
                    IssueKind::AmbiguousDate,
                    IssueSeverity::Info,
                    format!("{key} declared a year-only date; assumed July 1"),
                )
                .for_entity(entity_ref.to_string()),
            );
        }
        Some(parsed.date)
    }

    fn person_name(&self, record: &RawRecord) -> Option<(String, String)> {
        if let (Some(given), Some(family)) = (
            record.str_field("given_name"),
            record.str_field("family_name"),
        ) {
            return Some((names::clean_name(given), names::clean_name(family)));
        }
        let full = record.str_field("name")?.trim();
        if full.is_empty() {
            return None;
        }
        Some(names::split_full_name(full))
    }

    fn bill_number_pattern(&self) -> Option<&'static Regex> {
        match self.jurisdiction_kind {
            JurisdictionKind::Federal => Some(&FEDERAL_BILL_RE),
            JurisdictionKind::Provincial => Some(&PROVINCIAL_BILL_RE),
            // municipal identifiers are free-form
            JurisdictionKind::Municipal | JurisdictionKind::Civic => None,
        }
    }

    fn default_role(&self) -> RepresentativeRole {
        match self.jurisdiction_kind {
            JurisdictionKind::Federal => RepresentativeRole::Mp,
            JurisdictionKind::Provincial => RepresentativeRole::Mla,
            JurisdictionKind::Municipal => RepresentativeRole::Councillor,
            JurisdictionKind::Civic => RepresentativeRole::Other,
        }
    }

    fn map_role(&self, raw: &str) -> (RepresentativeRole, bool) {
        let folded = raw.trim().to_lowercase();
        let role = match folded.as_str() {
            "mp" | "member of parliament" => RepresentativeRole::Mp,
            "senator" => RepresentativeRole::Senator,
            "mpp" | "member of provincial parliament" => RepresentativeRole::Mpp,
            "mla" | "member of the legislative assembly" => RepresentativeRole::Mla,
            "mna" | "member of the national assembly" | "député" | "députée" => {
                RepresentativeRole::Mna
            }
            "premier" => RepresentativeRole::Premier,
            "mayor" | "maire" | "mairesse" => RepresentativeRole::Mayor,
            "councillor" | "council member" | "conseiller" | "conseillère" => {
                RepresentativeRole::Councillor
            }
            "regional councillor" => RepresentativeRole::RegionalCouncillor,
            "member" => self.default_role(),
            _ => return (RepresentativeRole::Other, false),
        };
        (role, true)
    }
}

fn map_bill_status(raw: &str) -> Option<BillStatus> {
    match raw.trim().to_lowercase().replace(' ', "_").as_str() {
        "introduced" => Some(BillStatus::Introduced),
        "first_reading" => Some(BillStatus::FirstReading),
        "second_reading" => Some(BillStatus::SecondReading),
        "committee" | "in_committee" => Some(BillStatus::Committee),
        "third_reading" => Some(BillStatus::ThirdReading),
        "passed" => Some(BillStatus::Passed),
        "royal_assent" => Some(BillStatus::RoyalAssent),
        "failed" | "defeated" => Some(BillStatus::Failed),
        "withdrawn" => Some(BillStatus::Withdrawn),
        _ => None,
    }
}

fn map_event_category(raw: &str) -> Option<EventCategory> {
    match raw.trim().to_lowercase().replace(' ', "_").as_str() {
        "meeting" => Some(EventCategory::Meeting),
        "vote" => Some(EventCategory::Vote),
        "reading" => Some(EventCategory::Reading),
        "committee_meeting" => Some(EventCategory::CommitteeMeeting),
        "other" => Some(EventCategory::Other),
        _ => None,
    }
}

fn map_vote_result(raw: &str) -> Option<VoteResult> {
    match raw.trim().to_lowercase().as_str() {
        "yes" | "yea" | "y" | "pour" => Some(VoteResult::Yes),
        "no" | "nay" | "n" | "contre" => Some(VoteResult::No),
        "abstain" | "abstained" | "abstention" => Some(VoteResult::Abstain),
        "absent" | "did not vote" => Some(VoteResult::Absent),
        _ => None,
    }
}

fn slug(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provincial() -> Normalizer {
        Normalizer::new("ca-on", JurisdictionKind::Provincial)
    }

    fn federal() -> Normalizer {
        Normalizer::new("ca", JurisdictionKind::Federal)
    }

    fn person_record(fields: serde_json::Value) -> RawRecord {
        RawRecord {
            kind: RawKind::Person,
            fields: fields.as_object().unwrap().clone(),
        }
    }

    #[test]
    fn person_with_structured_division_has_no_issue() {
        let record = person_record(json!({
            "name": "sandra  tremblay",
            "external_id": "p-1",
            "division": {"name": "Ottawa Centre"},
            "role": "MPP"
        }));

        let output = provincial().normalize(&record);
        assert_eq!(output.entities.len(), 1);
        assert!(output.issues.is_empty());

        let CanonicalEntity::Representative(rep) = &output.entities[0] else {
            panic!("expected representative");
        };
        assert_eq!(rep.given_name, "Sandra");
        assert_eq!(rep.family_name, "Tremblay");
        assert_eq!(rep.district.as_deref(), Some("Ottawa Centre"));
        assert_eq!(rep.role, RepresentativeRole::Mpp);
    }

    #[test]
    fn bare_string_division_yields_exactly_one_issue_and_one_entity() {
        let record = person_record(json!({
            "name": "Marc Miller",
            "external_id": "p-2",
            "division": "Ville-Marie"
        }));

        let output = provincial().normalize(&record);
        assert_eq!(output.entities.len(), 1);
        assert_eq!(output.issues.len(), 1);
        assert_eq!(output.issues[0].kind, IssueKind::AmbiguousDivision);
        assert_eq!(output.issues[0].severity, IssueSeverity::Info);

        let CanonicalEntity::Representative(rep) = &output.entities[0] else {
            panic!("expected representative");
        };
        assert_eq!(rep.district.as_deref(), Some("Ville-Marie"));
    }

    #[test]
    fn unknown_role_maps_to_other_with_info_issue() {
        let record = person_record(json!({
            "name": "A B",
            "external_id": "p-3",
            "role": "Chief Herald"
        }));

        let output = provincial().normalize(&record);
        let CanonicalEntity::Representative(rep) = &output.entities[0] else {
            panic!("expected representative");
        };
        assert_eq!(rep.role, RepresentativeRole::Other);
        assert!(output
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::UnknownClassification
                && i.severity == IssueSeverity::Info));
    }

    #[test]
    fn invalid_photo_url_is_nulled_with_warning() {
        let record = person_record(json!({
            "name": "A B",
            "external_id": "p-4",
            "photo_url": "ftp://legacy.example.ca/photo.jpg"
        }));

        let output = provincial().normalize(&record);
        let CanonicalEntity::Representative(rep) = &output.entities[0] else {
            panic!("expected representative");
        };
        assert!(rep.photo_url.is_none());
        assert!(output
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::InvalidUrl && i.severity == IssueSeverity::Warning));
    }

    #[test]
    fn nameless_person_is_dropped_with_error() {
        let record = person_record(json!({"external_id": "p-5"}));
        let output = provincial().normalize(&record);
        assert!(output.entities.is_empty());
        assert_eq!(output.issues.len(), 1);
        assert_eq!(output.issues[0].kind, IssueKind::MissingRequiredField);
        assert_eq!(output.issues[0].severity, IssueSeverity::Error);
    }

    #[test]
    fn federal_bill_number_is_validated() {
        let good = RawRecord {
            kind: RawKind::Bill,
            fields: json!({"number": "C-11", "title": "An Act", "session": "44-1"})
                .as_object()
                .unwrap()
                .clone(),
        };
        let output = federal().normalize(&good);
        assert!(output.issues.is_empty());

        let bad = RawRecord {
            kind: RawKind::Bill,
            fields: json!({"number": "Bylaw 7", "title": "An Act", "session": "44-1"})
                .as_object()
                .unwrap()
                .clone(),
        };
        let output = federal().normalize(&bad);
        // malformed identifier is observed but the record is kept
        assert_eq!(output.entities.len(), 1);
        assert!(output
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::MalformedIdentifier));
    }

    #[test]
    fn bill_sponsor_becomes_a_sponsorship_entity() {
        let record = RawRecord {
            kind: RawKind::Bill,
            fields: json!({
                "number": "C-11",
                "title": "An Act",
                "session": "44-1",
                "sponsor": {"name": "Sandra Tremblay", "external_id": "p-1"}
            })
            .as_object()
            .unwrap()
            .clone(),
        };

        let output = federal().normalize(&record);
        assert_eq!(output.entities.len(), 2);
        let CanonicalEntity::Sponsorship(sponsorship) = &output.entities[1] else {
            panic!("expected sponsorship");
        };
        assert_eq!(sponsorship.representative_external_id, "p-1");
        assert!(sponsorship.is_primary);
    }

    #[test]
    fn event_with_year_only_date_assumes_midyear() {
        let record = RawRecord {
            kind: RawKind::Event,
            fields: json!({"external_id": "ev-1", "date": "2023", "category": "meeting"})
                .as_object()
                .unwrap()
                .clone(),
        };

        let output = provincial().normalize(&record);
        let CanonicalEntity::Event(event) = &output.entities[0] else {
            panic!("expected event");
        };
        assert_eq!(event.event_date, NaiveDate::from_ymd_opt(2023, 7, 1).unwrap());
        assert!(output
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::AmbiguousDate && i.severity == IssueSeverity::Info));
    }

    #[test]
    fn vote_results_map_including_french_forms() {
        for (raw, expected) in [
            ("Yes", VoteResult::Yes),
            ("pour", VoteResult::Yes),
            ("Nay", VoteResult::No),
            ("abstention", VoteResult::Abstain),
        ] {
            let record = RawRecord {
                kind: RawKind::Vote,
                fields: json!({
                    "event_external_id": "ev-1",
                    "representative_external_id": "p-1",
                    "result": raw
                })
                .as_object()
                .unwrap()
                .clone(),
            };
            let output = provincial().normalize(&record);
            let CanonicalEntity::Vote(vote) = &output.entities[0] else {
                panic!("expected vote");
            };
            assert_eq!(vote.result, expected, "for raw result {raw:?}");
        }
    }

    #[test]
    fn unknown_records_pass_through_silently() {
        let record = RawRecord {
            kind: RawKind::Unknown,
            fields: json!({"text": "whatever"}).as_object().unwrap().clone(),
        };
        let output = provincial().normalize(&record);
        assert!(output.entities.is_empty());
        assert!(output.issues.is_empty());
    }

    #[test]
    fn slug_is_stable_and_url_safe() {
        assert_eq!(slug("Sandra Tremblay"), "sandra-tremblay");
        assert_eq!(slug("  Marie-Ève  D'Arcy "), "marie-ève-d-arcy");
    }
}
