//! Trigger filters applied to claimed events.
//!
//! Two optional keys on the trigger step configuration:
//! - `keywords`: comma-separated list (or array of strings); an event passes
//!   when any entry is a case-insensitive substring of any of its text fields
//! - `min_score`: events scoring below it, or carrying no score, are dropped;
//!   zero disables the score filter

use autoflow_integration::{AdapterError, ExternalEvent, StepConfig};
use serde_json::Value;

pub const KEYWORDS_KEY: &str = "keywords";
pub const MIN_SCORE_KEY: &str = "min_score";

/// Filters parsed from a trigger step configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerFilter {
    keywords: Vec<String>,
    min_score: Option<i64>,
}

impl TriggerFilter {
    /// Parses the filter keys of `config`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a key has the wrong shape.
    pub fn from_config(config: &StepConfig) -> Result<Self, AdapterError> {
        let keywords = match config.get(KEYWORDS_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(list)) => split_keywords(list.split(',')),
            Some(Value::Array(items)) => {
                let mut entries = Vec::with_capacity(items.len());
                for item in items {
                    let Some(entry) = item.as_str() else {
                        return Err(invalid(KEYWORDS_KEY, "entries must be strings"));
                    };
                    entries.push(entry);
                }
                split_keywords(entries.into_iter())
            }
            Some(_) => return Err(invalid(KEYWORDS_KEY, "expected a comma-separated string")),
        };

        let min_score = match config.get(MIN_SCORE_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(
                n.as_i64()
                    .or_else(|| n.as_f64().map(|f| f.ceil() as i64))
                    .ok_or_else(|| invalid(MIN_SCORE_KEY, "not a number"))?,
            ),
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(
                s.trim()
                    .parse()
                    .map_err(|_| invalid(MIN_SCORE_KEY, "not an integer"))?,
            ),
            Some(_) => return Err(invalid(MIN_SCORE_KEY, "expected an integer")),
        }
        .filter(|min| *min != 0);

        Ok(Self {
            keywords,
            min_score,
        })
    }

    /// Returns true if no filter is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && self.min_score.is_none()
    }

    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    #[must_use]
    pub fn min_score(&self) -> Option<i64> {
        self.min_score
    }

    /// Returns true if `event` passes every configured filter.
    #[must_use]
    pub fn matches(&self, event: &ExternalEvent) -> bool {
        self.matches_keywords(event) && self.matches_score(event)
    }

    fn matches_keywords(&self, event: &ExternalEvent) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        event.text.iter().any(|field| {
            let field = field.to_lowercase();
            self.keywords.iter().any(|k| field.contains(k.as_str()))
        })
    }

    fn matches_score(&self, event: &ExternalEvent) -> bool {
        match (self.min_score, event.score) {
            (None, _) => true,
            (Some(min), Some(score)) => score >= min,
            (Some(_), None) => false,
        }
    }
}

fn split_keywords<'a>(entries: impl Iterator<Item = &'a str>) -> Vec<String> {
    entries
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

fn invalid(key: &str, reason: &str) -> AdapterError {
    AdapterError::InvalidConfig {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn config(value: serde_json::Value) -> StepConfig {
        value.as_object().cloned().expect("object")
    }

    fn event(id: &str, title: &str) -> ExternalEvent {
        ExternalEvent::new(id, Utc::now()).with_text(title)
    }

    #[test]
    fn keyword_scenario() {
        let filter =
            TriggerFilter::from_config(&config(json!({"keywords": "project, update"})))
                .expect("valid");

        assert!(filter.matches(&event("1", "Weekly Project Update")));
        assert!(!filter.matches(&event("2", "lunch plans")));
    }

    #[test]
    fn empty_keyword_entries_ignored() {
        let filter = TriggerFilter::from_config(&config(json!({"keywords": " , rust,, "})))
            .expect("valid");
        assert_eq!(filter.keywords(), ["rust"]);
        assert!(!filter.matches(&event("1", "anything at all")));

        let blank = TriggerFilter::from_config(&config(json!({"keywords": " , "})))
            .expect("valid");
        assert!(blank.is_empty());
        assert!(blank.matches(&event("1", "anything at all")));
    }

    #[test]
    fn keywords_match_any_text_field() {
        let filter =
            TriggerFilter::from_config(&config(json!({"keywords": ["Tokio"]}))).expect("valid");
        let e = ExternalEvent::new("1", Utc::now())
            .with_text("title without it")
            .with_text("body mentions tokio runtime");
        assert!(filter.matches(&e));
    }

    #[test]
    fn min_score_drops_low_and_missing_scores() {
        let filter =
            TriggerFilter::from_config(&config(json!({"min_score": 10}))).expect("valid");

        assert!(filter.matches(&event("1", "a").with_score(10)));
        assert!(!filter.matches(&event("2", "b").with_score(9)));
        assert!(!filter.matches(&event("3", "c")));
    }

    #[test]
    fn zero_min_score_disables_score_filter() {
        for value in [json!(0), json!("0"), json!(0.0)] {
            let filter = TriggerFilter::from_config(&config(json!({"min_score": value})))
                .expect("valid");
            assert_eq!(filter.min_score(), None);
            assert!(filter.is_empty());
            assert!(filter.matches(&event("1", "a").with_score(-3)));
            assert!(filter.matches(&event("2", "b")));
        }
    }

    #[test]
    fn min_score_accepts_numeric_string() {
        let filter =
            TriggerFilter::from_config(&config(json!({"min_score": " 5 "}))).expect("valid");
        assert_eq!(filter.min_score(), Some(5));
    }

    #[test]
    fn malformed_values_rejected() {
        assert!(matches!(
            TriggerFilter::from_config(&config(json!({"min_score": "lots"}))),
            Err(AdapterError::InvalidConfig { key, .. }) if key == MIN_SCORE_KEY
        ));
        assert!(matches!(
            TriggerFilter::from_config(&config(json!({"keywords": 3}))),
            Err(AdapterError::InvalidConfig { key, .. }) if key == KEYWORDS_KEY
        ));
    }

    #[test]
    fn no_filters_accept_everything() {
        let filter = TriggerFilter::from_config(&StepConfig::new()).expect("valid");
        assert!(filter.is_empty());
        assert!(filter.matches(&event("1", "x")));
    }
}
