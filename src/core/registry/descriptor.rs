//! Scraper Descriptors
//!
//! Static metadata describing a scraper: identity, category, jurisdiction,
//! schedule, budget hints, and capability flags. Descriptors come from each
//! scraper directory's `scraper.json`, never from code.

use crate::core::model::{Category, Jurisdiction, JurisdictionKind};
use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Rough expected record volume, used to derive the record budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EstimatedSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl EstimatedSize {
    /// Record budget for a run of this size
    #[must_use]
    pub fn max_records(&self) -> usize {
        match self {
            Self::Small => 500,
            Self::Medium => 5_000,
            Self::Large => 50_000,
        }
    }
}

/// What a scraper collects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub representatives: bool,
    #[serde(default)]
    pub bills: bool,
    #[serde(default)]
    pub committees: bool,
    #[serde(default)]
    pub events: bool,
    #[serde(default)]
    pub votes: bool,
}

/// Cron-style schedule declared in scraper metadata
///
/// Textual forms: `manual`, `daily`, `daily@06:30`, `weekly:mon`,
/// `weekly:mon@07:00`, `monthly:15`, `monthly:15@04:00`. The default fire
/// time is 06:00 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Schedule {
    pub cadence: Cadence,
    pub at: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Manual,
    Daily,
    Weekly(Weekday),
    Monthly(u32),
}

impl Schedule {
    pub const DEFAULT_FIRE_TIME: NaiveTime = match NaiveTime::from_hms_opt(6, 0, 0) {
        Some(t) => t,
        None => panic!("06:00 is a valid time"),
    };

    #[must_use]
    pub fn manual() -> Self {
        Self {
            cadence: Cadence::Manual,
            at: Self::DEFAULT_FIRE_TIME,
        }
    }

    #[must_use]
    pub fn daily() -> Self {
        Self {
            cadence: Cadence::Daily,
            at: Self::DEFAULT_FIRE_TIME,
        }
    }

    /// Whether the schedule fires within the given wall-clock minute
    #[must_use]
    pub fn fires_in_minute(&self, minute: chrono::NaiveDateTime) -> bool {
        use chrono::{Datelike, Timelike};

        let fire_minute = self.at.hour() == minute.time().hour()
            && self.at.minute() == minute.time().minute();

        match self.cadence {
            Cadence::Manual => false,
            Cadence::Daily => fire_minute,
            Cadence::Weekly(day) => fire_minute && minute.date().weekday() == day,
            Cadence::Monthly(day) => fire_minute && minute.date().day() == day,
        }
    }
}

impl std::str::FromStr for Schedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (spec, at) = match s.split_once('@') {
            Some((spec, time)) => {
                let at = NaiveTime::parse_from_str(time, "%H:%M")
                    .map_err(|_| format!("invalid schedule time: {time:?}"))?;
                (spec, at)
            }
            None => (s, Self::DEFAULT_FIRE_TIME),
        };

        let cadence = match spec.split_once(':') {
            None => match spec {
                "manual" => Cadence::Manual,
                "daily" => Cadence::Daily,
                other => return Err(format!("unknown schedule: {other:?}")),
            },
            Some(("weekly", day)) => {
                let weekday = day
                    .parse::<Weekday>()
                    .map_err(|_| format!("invalid weekday: {day:?}"))?;
                Cadence::Weekly(weekday)
            }
            Some(("monthly", day)) => {
                let day: u32 = day
                    .parse()
                    .map_err(|_| format!("invalid day of month: {day:?}"))?;
                if !(1..=28).contains(&day) {
                    return Err(format!("day of month must be 1..=28, got {day}"));
                }
                Cadence::Monthly(day)
            }
            Some((other, _)) => return Err(format!("unknown schedule: {other:?}")),
        };

        Ok(Self { cadence, at })
    }
}

impl TryFrom<String> for Schedule {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Schedule> for String {
    fn from(schedule: Schedule) -> Self {
        let spec = match schedule.cadence {
            Cadence::Manual => "manual".to_string(),
            Cadence::Daily => "daily".to_string(),
            Cadence::Weekly(day) => format!("weekly:{}", day.to_string().to_lowercase()),
            Cadence::Monthly(day) => format!("monthly:{day}"),
        };
        if schedule.at == Schedule::DEFAULT_FIRE_TIME {
            spec
        } else {
            format!("{}@{}", spec, schedule.at.format("%H:%M"))
        }
    }
}

/// Jurisdiction block inside scraper metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionMeta {
    pub code: String,
    pub kind: JurisdictionKind,
    pub name: String,

    #[serde(default)]
    pub parent_code: Option<String>,

    #[serde(default)]
    pub division_id: Option<String>,

    #[serde(default)]
    pub website: Option<String>,
}

impl JurisdictionMeta {
    /// Unsaved jurisdiction row (id 0 until the store assigns one)
    #[must_use]
    pub fn to_entity(&self) -> Jurisdiction {
        Jurisdiction {
            id: 0,
            kind: self.kind,
            code: self.code.clone(),
            name: self.name.clone(),
            parent_code: self.parent_code.clone(),
            division_id: self.division_id.clone(),
            website: self.website.clone(),
        }
    }
}

/// Static metadata for one scraper (`scraper.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperDescriptor {
    pub id: String,
    pub category: Category,
    pub jurisdiction: JurisdictionMeta,

    #[serde(default)]
    pub estimated_size: EstimatedSize,

    /// Per-run hard deadline; the configured default applies when absent
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    #[serde(default = "default_schedule")]
    pub schedule: Schedule,

    #[serde(default)]
    pub capabilities: Capabilities,

    /// Extraction entry point inside the scraper directory
    #[serde(default = "default_entry")]
    pub entry: String,
}

fn default_schedule() -> Schedule {
    Schedule::manual()
}

fn default_entry() -> String {
    "endpoints.json".to_string()
}

impl ScraperDescriptor {
    /// Effective per-run timeout in seconds
    #[must_use]
    pub fn timeout_or(&self, default_seconds: u64) -> u64 {
        self.timeout_seconds.unwrap_or(default_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn minute(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap()
    }

    #[test]
    fn schedule_parses_all_forms() {
        assert_eq!("manual".parse::<Schedule>().unwrap().cadence, Cadence::Manual);
        assert_eq!("daily".parse::<Schedule>().unwrap().cadence, Cadence::Daily);
        assert_eq!(
            "weekly:mon".parse::<Schedule>().unwrap().cadence,
            Cadence::Weekly(Weekday::Mon)
        );
        assert_eq!(
            "monthly:15".parse::<Schedule>().unwrap().cadence,
            Cadence::Monthly(15)
        );

        let timed = "daily@21:30".parse::<Schedule>().unwrap();
        assert_eq!(timed.at, NaiveTime::from_hms_opt(21, 30, 0).unwrap());
    }

    #[test]
    fn schedule_rejects_bad_forms() {
        assert!("hourly".parse::<Schedule>().is_err());
        assert!("weekly:funday".parse::<Schedule>().is_err());
        assert!("monthly:31".parse::<Schedule>().is_err());
        assert!("daily@25:00".parse::<Schedule>().is_err());
    }

    #[test]
    fn schedule_serde_round_trips() {
        for text in ["manual", "daily", "weekly:mon", "monthly:1", "daily@04:15"] {
            let schedule: Schedule = text.parse().unwrap();
            let json = serde_json::to_string(&schedule).unwrap();
            let back: Schedule = serde_json::from_str(&json).unwrap();
            assert_eq!(schedule, back, "round trip failed for {text}");
        }
    }

    #[test]
    fn daily_fires_only_in_its_minute() {
        let schedule = "daily@06:00".parse::<Schedule>().unwrap();
        assert!(schedule.fires_in_minute(minute(2025, 3, 10, 6, 0)));
        assert!(!schedule.fires_in_minute(minute(2025, 3, 10, 6, 1)));
        assert!(!schedule.fires_in_minute(minute(2025, 3, 10, 7, 0)));
    }

    #[test]
    fn weekly_checks_the_weekday() {
        let schedule = "weekly:mon@06:00".parse::<Schedule>().unwrap();
        // 2025-03-10 is a Monday
        assert!(schedule.fires_in_minute(minute(2025, 3, 10, 6, 0)));
        assert!(!schedule.fires_in_minute(minute(2025, 3, 11, 6, 0)));
    }

    #[test]
    fn monthly_checks_the_day() {
        let schedule = "monthly:15".parse::<Schedule>().unwrap();
        assert!(schedule.fires_in_minute(minute(2025, 3, 15, 6, 0)));
        assert!(!schedule.fires_in_minute(minute(2025, 3, 16, 6, 0)));
    }

    #[test]
    fn manual_never_fires() {
        let schedule = Schedule::manual();
        assert!(!schedule.fires_in_minute(minute(2025, 3, 10, 6, 0)));
    }

    #[test]
    fn descriptor_deserializes_with_defaults() {
        let descriptor: ScraperDescriptor = serde_json::from_str(
            r#"{
                "id": "ca_on",
                "category": "provincial",
                "jurisdiction": {"code": "ca-on", "kind": "provincial", "name": "Ontario"}
            }"#,
        )
        .unwrap();

        assert_eq!(descriptor.entry, "endpoints.json");
        assert_eq!(descriptor.schedule.cadence, Cadence::Manual);
        assert_eq!(descriptor.estimated_size, EstimatedSize::Medium);
        assert_eq!(descriptor.timeout_or(300), 300);
        assert!(!descriptor.capabilities.representatives);
    }

    #[test]
    fn estimated_size_budgets_are_ordered() {
        assert!(EstimatedSize::Small.max_records() < EstimatedSize::Medium.max_records());
        assert!(EstimatedSize::Medium.max_records() < EstimatedSize::Large.max_records());
    }
}
