//! Per-run execution context threaded through an action chain.
//!
//! The context lives for one execution: it holds the triggering event and
//! the result of every action step completed so far, keyed by step index.
//! Adapters may reference either through `{{ ... }}` placeholders:
//!
//! - `{{event.id}}`, `{{event.payload.title}}`
//! - `{{steps.0.external_id}}`, `{{steps.1.data.url}}`

use crate::adapter::{ActionResult, ExternalEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// A placeholder that does not resolve against the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedPlaceholder {
    pub placeholder: String,
}

impl fmt::Display for UnresolvedPlaceholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unresolved placeholder '{{{{{}}}}}'", self.placeholder)
    }
}

impl std::error::Error for UnresolvedPlaceholder {}

/// Event payload plus completed step outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    event: ExternalEvent,
    outputs: BTreeMap<usize, ActionResult>,
}

impl ExecutionContext {
    /// Seeds a context with the triggering event.
    #[must_use]
    pub fn new(event: ExternalEvent) -> Self {
        Self {
            event,
            outputs: BTreeMap::new(),
        }
    }

    /// Returns the triggering event.
    #[must_use]
    pub fn event(&self) -> &ExternalEvent {
        &self.event
    }

    /// Returns the output of a completed step.
    #[must_use]
    pub fn output(&self, step_index: usize) -> Option<&ActionResult> {
        self.outputs.get(&step_index)
    }

    /// Number of completed steps.
    #[must_use]
    pub fn completed_steps(&self) -> usize {
        self.outputs.len()
    }

    /// Records the result of a step.
    pub fn record(&mut self, step_index: usize, result: ActionResult) {
        self.outputs.insert(step_index, result);
    }

    /// Resolves a dotted path such as `event.payload.title`.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<JsonValue> {
        let mut segments = path.split('.');
        let root = match segments.next()? {
            "event" => serde_json::to_value(&self.event).ok()?,
            "steps" => {
                let index: usize = segments.next()?.parse().ok()?;
                serde_json::to_value(self.outputs.get(&index)?).ok()?
            }
            _ => return None,
        };

        segments
            .try_fold(root, |value, segment| match value {
                JsonValue::Object(mut map) => map.remove(segment),
                JsonValue::Array(mut items) => {
                    let i: usize = segment.parse().ok()?;
                    (i < items.len()).then(|| items.swap_remove(i))
                }
                _ => None,
            })
            .filter(|v| !v.is_null())
    }

    /// Substitutes every `{{path}}` in `template`.
    ///
    /// Text without a closing `}}` is kept literally.
    ///
    /// # Errors
    ///
    /// Returns the first placeholder that does not resolve.
    pub fn render(&self, template: &str) -> Result<String, UnresolvedPlaceholder> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            out.push_str(&rest[..start]);

            let placeholder = rest[start + 2..start + 2 + len].trim();
            match self.lookup(placeholder) {
                Some(JsonValue::String(s)) => out.push_str(&s),
                Some(other) => out.push_str(&other.to_string()),
                None => {
                    return Err(UnresolvedPlaceholder {
                        placeholder: placeholder.to_string(),
                    });
                }
            }
            rest = &rest[start + 2 + len + 2..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn context() -> ExecutionContext {
        let event = ExternalEvent::new("t3_abc", Utc::now())
            .with_scope("rust")
            .with_payload(json!({"title": "project update", "tags": ["a", "b"], "score": 12}));
        let mut ctx = ExecutionContext::new(event);
        ctx.record(
            0,
            ActionResult::new(json!({"url": "https://example.test/p/1"})).with_external_id("p1"),
        );
        ctx
    }

    #[test]
    fn renders_event_and_step_placeholders() {
        let ctx = context();
        let rendered = ctx
            .render("New: {{ event.payload.title }} ({{steps.0.external_id}}) {{steps.0.data.url}}")
            .expect("render");
        assert_eq!(
            rendered,
            "New: project update (p1) https://example.test/p/1"
        );
    }

    #[test]
    fn non_string_values_render_as_json() {
        let ctx = context();
        assert_eq!(ctx.render("{{event.payload.score}}").expect("render"), "12");
        assert_eq!(ctx.render("{{event.payload.tags.1}}").expect("render"), "b");
    }

    #[test]
    fn unresolved_placeholder_is_an_error() {
        let ctx = context();
        let err = ctx.render("{{steps.4.data}}").unwrap_err();
        assert_eq!(err.placeholder, "steps.4.data");
    }

    #[test]
    fn unclosed_braces_are_literal() {
        let ctx = context();
        assert_eq!(ctx.render("a {{ b").expect("render"), "a {{ b");
    }

    #[test]
    fn records_outputs_in_step_order() {
        let mut ctx = context();
        ctx.record(1, ActionResult::new(json!(null)));
        assert_eq!(ctx.completed_steps(), 2);
        assert!(ctx.output(0).is_some() && ctx.output(1).is_some());
        assert!(ctx.output(2).is_none());
    }
}
