//! Scraper Registry
//!
//! Discovers scrapers by convention on disk: one directory per scraper,
//! each holding a `scraper.json` metadata file and the extraction entry
//! point it names. Invalid directories are excluded and reported as
//! data-quality issues; an empty registry fails startup.

mod descriptor;

pub use descriptor::{
    Cadence, Capabilities, EstimatedSize, JurisdictionMeta, Schedule, ScraperDescriptor,
};

use crate::core::model::{DataQualityIssue, IssueKind, IssueSeverity, Jurisdiction};
use crate::core::scrapers::drivers::JsonApiScraper;
use crate::core::scrapers::rate_limiter::RateLimiter;
use crate::core::scrapers::Scraper;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Registry load failures
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No valid scraper was found; the process cannot do useful work
    #[error("no valid scrapers found under {dir}")]
    RegistryEmpty { dir: String },

    /// The scrapers directory itself is unreadable
    #[error("failed to read scrapers directory {dir}: {source}")]
    Io {
        dir: String,
        #[source]
        source: std::io::Error,
    },
}

/// The discovered scraper fleet
pub struct ScraperRegistry {
    descriptors: Vec<ScraperDescriptor>,
    scrapers: HashMap<String, Arc<dyn Scraper>>,
    load_issues: Vec<DataQualityIssue>,
}

impl std::fmt::Debug for ScraperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScraperRegistry")
            .field("descriptors", &self.descriptors)
            .field("scrapers", &self.scrapers.keys().collect::<Vec<_>>())
            .field("load_issues", &self.load_issues)
            .finish()
    }
}

impl ScraperRegistry {
    /// Scan `dir` and build the registry
    ///
    /// `bindings` supplies in-process scraper implementations keyed by id;
    /// directories without a binding fall back to the JSON-API driver when
    /// their entry point exists. At least one valid scraper is required.
    pub fn load(
        dir: &Path,
        limiter: &RateLimiter,
        mut bindings: HashMap<String, Arc<dyn Scraper>>,
    ) -> Result<Self, RegistryError> {
        let entries = std::fs::read_dir(dir).map_err(|source| RegistryError::Io {
            dir: dir.display().to_string(),
            source,
        })?;

        let mut descriptors = Vec::new();
        let mut scrapers: HashMap<String, Arc<dyn Scraper>> = HashMap::new();
        let mut load_issues = Vec::new();

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            match Self::load_one(&path, limiter, &mut bindings) {
                Ok((descriptor, scraper)) => {
                    tracing::debug!(id = %descriptor.id, "registered scraper");
                    scrapers.insert(descriptor.id.clone(), scraper);
                    descriptors.push(descriptor);
                }
                Err(reason) => {
                    tracing::warn!(dir = %path.display(), %reason, "excluding invalid scraper directory");
                    load_issues.push(DataQualityIssue::new(
                        IssueKind::MissingRequiredField,
                        IssueSeverity::Error,
                        format!("invalid scraper directory {}: {reason}", path.display()),
                    ));
                }
            }
        }

        if descriptors.is_empty() {
            return Err(RegistryError::RegistryEmpty {
                dir: dir.display().to_string(),
            });
        }

        descriptors.sort_by(|a, b| {
            a.category
                .rank()
                .cmp(&b.category.rank())
                .then_with(|| a.id.cmp(&b.id))
        });

        tracing::info!(
            scrapers = descriptors.len(),
            excluded = load_issues.len(),
            "scraper registry loaded"
        );

        Ok(Self {
            descriptors,
            scrapers,
            load_issues,
        })
    }

    fn load_one(
        dir: &Path,
        limiter: &RateLimiter,
        bindings: &mut HashMap<String, Arc<dyn Scraper>>,
    ) -> Result<(ScraperDescriptor, Arc<dyn Scraper>), String> {
        let metadata_path = dir.join("scraper.json");
        let content = std::fs::read_to_string(&metadata_path)
            .map_err(|_| "missing scraper.json".to_string())?;

        let descriptor: ScraperDescriptor = serde_json::from_str(&content)
            .map_err(|e| format!("malformed scraper.json: {e}"))?;

        if descriptor.id.is_empty() {
            return Err("scraper.json declares an empty id".to_string());
        }

        // a supplied binding satisfies the entry-point requirement
        if let Some(scraper) = bindings.remove(&descriptor.id) {
            return Ok((descriptor, scraper));
        }

        let entry_path = dir.join(&descriptor.entry);
        if !entry_path.is_file() {
            return Err(format!("missing extraction entry point {}", descriptor.entry));
        }

        let scraper = JsonApiScraper::from_entry_file(
            descriptor.id.clone(),
            &entry_path,
            limiter.clone(),
        )
        .map_err(|e| format!("unusable entry point: {e}"))?;

        Ok((descriptor, Arc::new(scraper)))
    }

    /// All descriptors, ordered by (category rank, id)
    #[must_use]
    pub fn list(&self) -> &[ScraperDescriptor] {
        &self.descriptors
    }

    /// Descriptor by scraper id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ScraperDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }

    /// Executable scraper by id
    #[must_use]
    pub fn scraper(&self, id: &str) -> Option<Arc<dyn Scraper>> {
        self.scrapers.get(id).cloned()
    }

    /// Issues recorded while loading (invalid directories)
    #[must_use]
    pub fn load_issues(&self) -> &[DataQualityIssue] {
        &self.load_issues
    }

    /// Distinct jurisdictions declared across the fleet, deduplicated by
    /// code
    #[must_use]
    pub fn jurisdictions(&self) -> Vec<Jurisdiction> {
        let mut by_code: HashMap<&str, Jurisdiction> = HashMap::new();
        for descriptor in &self.descriptors {
            by_code
                .entry(descriptor.jurisdiction.code.as_str())
                .or_insert_with(|| descriptor.jurisdiction.to_entity());
        }
        let mut jurisdictions: Vec<_> = by_code.into_values().collect();
        jurisdictions.sort_by(|a, b| a.code.cmp(&b.code));
        jurisdictions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_scraper(dir: &Path, id: &str, category: &str, code: &str, with_entry: bool) {
        let scraper_dir = dir.join(id);
        fs::create_dir_all(&scraper_dir).unwrap();
        fs::write(
            scraper_dir.join("scraper.json"),
            format!(
                r#"{{
                    "id": "{id}",
                    "category": "{category}",
                    "jurisdiction": {{"code": "{code}", "kind": "provincial", "name": "Test"}},
                    "schedule": "daily"
                }}"#
            ),
        )
        .unwrap();
        if with_entry {
            fs::write(
                scraper_dir.join("endpoints.json"),
                r#"{"endpoints": [{"url": "https://example.ca/api", "kind": "person"}]}"#,
            )
            .unwrap();
        }
    }

    fn limiter() -> RateLimiter {
        RateLimiter::default()
    }

    #[test]
    fn loads_valid_directories_in_category_order() {
        let dir = tempfile::tempdir().unwrap();
        write_scraper(dir.path(), "ca_toronto", "municipal", "ca-on-toronto", true);
        write_scraper(dir.path(), "ca_on", "provincial", "ca-on", true);
        write_scraper(dir.path(), "openparliament", "parliamentary", "ca", true);

        let registry = ScraperRegistry::load(dir.path(), &limiter(), HashMap::new()).unwrap();

        let ids: Vec<_> = registry.list().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["openparliament", "ca_on", "ca_toronto"]);
        assert!(registry.load_issues().is_empty());
        assert!(registry.scraper("ca_on").is_some());
    }

    #[test]
    fn missing_entry_point_is_excluded_with_issue() {
        let dir = tempfile::tempdir().unwrap();
        write_scraper(dir.path(), "ca_on", "provincial", "ca-on", true);
        write_scraper(dir.path(), "ca_broken", "provincial", "ca-qc", false);

        let registry = ScraperRegistry::load(dir.path(), &limiter(), HashMap::new()).unwrap();

        assert!(registry.get("ca_broken").is_none());
        assert_eq!(registry.load_issues().len(), 1);
        let issue = &registry.load_issues()[0];
        assert_eq!(issue.kind, IssueKind::MissingRequiredField);
        assert_eq!(issue.severity, IssueSeverity::Error);
        assert!(issue.description.contains("ca_broken"));
    }

    #[test]
    fn missing_metadata_is_excluded_with_issue() {
        let dir = tempfile::tempdir().unwrap();
        write_scraper(dir.path(), "ca_on", "provincial", "ca-on", true);
        fs::create_dir_all(dir.path().join("empty_dir")).unwrap();

        let registry = ScraperRegistry::load(dir.path(), &limiter(), HashMap::new()).unwrap();
        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.load_issues().len(), 1);
    }

    #[test]
    fn empty_registry_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("only_invalid")).unwrap();

        let err = ScraperRegistry::load(dir.path(), &limiter(), HashMap::new()).unwrap_err();
        assert!(matches!(err, RegistryError::RegistryEmpty { .. }));
    }

    #[test]
    fn binding_satisfies_missing_entry_point() {
        use crate::core::scrapers::{
            CancelToken, RawPayload, RecordSender, RunBudget, ScrapeResult,
        };
        use async_trait::async_trait;

        struct NullScraper;

        #[async_trait]
        impl Scraper for NullScraper {
            fn id(&self) -> &str {
                "ca_custom"
            }

            async fn extract(
                &self,
                _budget: &RunBudget,
                _cancel: &CancelToken,
                _tx: RecordSender,
            ) -> ScrapeResult<()> {
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        write_scraper(dir.path(), "ca_custom", "civic", "ca", false);

        let mut bindings: HashMap<String, Arc<dyn Scraper>> = HashMap::new();
        bindings.insert("ca_custom".to_string(), Arc::new(NullScraper));

        let registry = ScraperRegistry::load(dir.path(), &limiter(), bindings).unwrap();
        assert!(registry.get("ca_custom").is_some());
        assert!(registry.load_issues().is_empty());
    }

    #[test]
    fn jurisdictions_are_deduplicated_by_code() {
        let dir = tempfile::tempdir().unwrap();
        write_scraper(dir.path(), "ca_on_people", "provincial", "ca-on", true);
        write_scraper(dir.path(), "ca_on_bills", "provincial", "ca-on", true);

        let registry = ScraperRegistry::load(dir.path(), &limiter(), HashMap::new()).unwrap();
        assert_eq!(registry.jurisdictions().len(), 1);
        assert_eq!(registry.jurisdictions()[0].code, "ca-on");
    }
}
