//! Jinja2-style rendering for notification messages and integration requests.

use minijinja::{Environment, Error, ErrorKind, Value};
use serde_json::Map;

use crate::error::{EngineError, EngineResult};

const TASK_ASSIGNED: &str = "A new {{ taskType | default('approval') }} task has been assigned to you \
for request {{ requestData.id | default('(unknown)') }}.";

const REQUEST_APPROVED: &str = "Request {{ requestData.id | default('(unknown)') }} has been approved.";

const REQUEST_REJECTED: &str = "Request {{ requestData.id | default('(unknown)') }} has been rejected\
{% if rejectionReason %}: {{ rejectionReason }}{% endif %}.";

const SLA_BREACHED: &str = "The SLA for request {{ requestData.id | default('(unknown)') }} has been breached.";

/// Names of the built-in message templates.
pub const BUILTIN_TEMPLATES: [&str; 4] = [
    "task_assigned",
    "request_approved",
    "request_rejected",
    "sla_breached",
];

/// Template renderer with the built-in message templates preloaded.
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_filter("tojson", filter_tojson);

        for (name, source) in BUILTIN_TEMPLATES
            .iter()
            .copied()
            .zip([TASK_ASSIGNED, REQUEST_APPROVED, REQUEST_REJECTED, SLA_BREACHED])
        {
            if let Err(e) = env.add_template(name, source) {
                tracing::error!(template = %name, error = %e, "Invalid built-in template");
            }
        }

        Self { env }
    }

    /// Render an inline template string against the context.
    pub fn render(&self, template: &str, context: &Map<String, serde_json::Value>) -> EngineResult<String> {
        if !contains_template_syntax(template) {
            return Ok(template.to_string());
        }

        let tmpl = self
            .env
            .template_from_str(template)
            .map_err(|e| EngineError::Definition(format!("template parse error: {}", e)))?;

        tmpl.render(Value::from_serialize(context))
            .map_err(|e| EngineError::Definition(format!("template render error: {}", e)))
    }

    /// Render one of the [`BUILTIN_TEMPLATES`] by name.
    pub fn render_named(&self, name: &str, context: &Map<String, serde_json::Value>) -> EngineResult<String> {
        let tmpl = self
            .env
            .get_template(name)
            .map_err(|_| EngineError::Definition(format!("unknown message template '{}'", name)))?;

        tmpl.render(Value::from_serialize(context))
            .map_err(|e| EngineError::Definition(format!("template render error: {}", e)))
    }

    /// Render every string leaf of a JSON structure. Keys are left alone.
    pub fn render_value(
        &self,
        value: &serde_json::Value,
        context: &Map<String, serde_json::Value>,
    ) -> EngineResult<serde_json::Value> {
        match value {
            serde_json::Value::String(s) => Ok(serde_json::Value::String(self.render(s, context)?)),
            serde_json::Value::Object(map) => {
                let mut result = Map::new();
                for (k, v) in map {
                    result.insert(k.clone(), self.render_value(v, context)?);
                }
                Ok(serde_json::Value::Object(result))
            }
            serde_json::Value::Array(items) => items
                .iter()
                .map(|v| self.render_value(v, context))
                .collect::<EngineResult<Vec<_>>>()
                .map(serde_json::Value::Array),
            _ => Ok(value.clone()),
        }
    }
}

/// Check if a string contains Jinja2 template syntax.
fn contains_template_syntax(s: &str) -> bool {
    (s.contains("{{") && s.contains("}}")) || (s.contains("{%") && s.contains("%}"))
}

fn filter_tojson(value: Value) -> Result<String, Error> {
    serde_json::to_string(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: serde_json::Value) -> Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_plain_string_passthrough() {
        let renderer = TemplateRenderer::new();
        assert_eq!(renderer.render("no templates", &Map::new()).unwrap(), "no templates");
    }

    #[test]
    fn test_render_path() {
        let renderer = TemplateRenderer::new();
        let context = ctx(json!({"requestData": {"id": "r-7"}}));
        assert_eq!(
            renderer
                .render("https://erp.local/requests/{{ requestData.id }}", &context)
                .unwrap(),
            "https://erp.local/requests/r-7"
        );
    }

    #[test]
    fn test_builtin_templates_render() {
        let renderer = TemplateRenderer::new();
        let context = ctx(json!({"requestData": {"id": "r-1"}, "rejectionReason": "over budget"}));

        for name in BUILTIN_TEMPLATES {
            let text = renderer.render_named(name, &context).unwrap();
            assert!(text.contains("r-1"), "{name}: {text}");
        }
        assert_eq!(
            renderer.render_named("request_rejected", &context).unwrap(),
            "Request r-1 has been rejected: over budget."
        );
        assert!(renderer.render_named("nope", &context).is_err());
    }

    #[test]
    fn test_render_value_leaves() {
        let renderer = TemplateRenderer::new();
        let context = ctx(json!({"site": "north", "qty": 4}));
        let body = json!({"site": "{{ site }}", "lines": [{"qty": "{{ qty }}"}], "fixed": 1});

        assert_eq!(
            renderer.render_value(&body, &context).unwrap(),
            json!({"site": "north", "lines": [{"qty": "4"}], "fixed": 1})
        );
    }

    #[test]
    fn test_tojson_filter() {
        let renderer = TemplateRenderer::new();
        let context = ctx(json!({"items": [1, 2]}));
        assert_eq!(renderer.render("{{ items | tojson }}", &context).unwrap(), "[1,2]");
    }

    #[test]
    fn test_parse_error_is_definition_error() {
        let renderer = TemplateRenderer::new();
        let err = renderer.render("{% if %}{{ x }}", &Map::new()).unwrap_err();
        assert!(matches!(err, EngineError::Definition(_)));
    }
}
