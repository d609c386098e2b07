//! Date parsing
//!
//! Accepts ISO-8601 and the common long forms civic sources publish. A
//! year-only date is assumed to mean July 1 of that year and is flagged so
//! the caller can record the assumption.

use chrono::NaiveDate;

/// A parsed date and whether its day/month were assumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedDate {
    pub date: NaiveDate,
    pub assumed_midyear: bool,
}

/// Parse a date string in any accepted form
#[must_use]
pub fn parse_date(raw: &str) -> Option<ParsedDate> {
    let trimmed = raw.trim();

    // ISO date, possibly with a trailing time component
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(ParsedDate {
            date,
            assumed_midyear: false,
        });
    }
    if let Some((date_part, _)) = trimmed.split_once('T') {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
            return Some(ParsedDate {
                date,
                assumed_midyear: false,
            });
        }
    }

    // long forms: "July 1, 2023", "1 July 2023"
    for format in ["%B %d, %Y", "%B %e, %Y", "%d %B %Y", "%e %B %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(ParsedDate {
                date,
                assumed_midyear: false,
            });
        }
    }

    // bare year: assume July 1
    if trimmed.len() == 4 {
        if let Ok(year) = trimmed.parse::<i32>() {
            if (1800..=2200).contains(&year) {
                return NaiveDate::from_ymd_opt(year, 7, 1).map(|date| ParsedDate {
                    date,
                    assumed_midyear: true,
                });
            }
        }
    }

    None
}
