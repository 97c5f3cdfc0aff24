//! Message templates.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ChannelKind;

/// A pre-approved message template for one channel.
///
/// `variables` lists the placeholder names the body expects; channels check
/// supplied variables against this list before a template send goes out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Provider-side template name (WhatsApp) or internal name (email/SMS).
    pub name: String,
    pub channel: ChannelKind,
    pub language: Option<String>,
    pub body: String,
    pub variables: Vec<String>,
}

impl Template {
    /// Whether the supplied variable map covers every declared placeholder.
    #[must_use]
    pub fn variables_satisfied_by(&self, supplied: &serde_json::Value) -> bool {
        let Some(map) = supplied.as_object() else {
            return self.variables.is_empty();
        };
        self.variables.iter().all(|name| map.contains_key(name))
    }

    /// Substitute `{{name}}` placeholders in the body with supplied values.
    ///
    /// Non-string values render via their JSON form; missing placeholders are
    /// left in place (callers gate on `variables_satisfied_by` first).
    #[must_use]
    pub fn render(&self, supplied: &serde_json::Value) -> String {
        let mut rendered = self.body.clone();
        if let Some(map) = supplied.as_object() {
            for (name, value) in map {
                let placeholder = format!("{{{{{name}}}}}");
                let replacement = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                rendered = rendered.replace(&placeholder, &replacement);
            }
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_with_vars(vars: &[&str]) -> Template {
        Template {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "followup_1".to_owned(),
            channel: ChannelKind::WhatsApp,
            language: Some("en".to_owned()),
            body: "Hi {{first_name}}, following up on {{topic}}.".to_owned(),
            variables: vars.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    #[test]
    fn test_variables_satisfied() {
        let template = template_with_vars(&["first_name", "topic"]);
        let supplied = serde_json::json!({ "first_name": "Ada", "topic": "pricing" });
        assert!(template.variables_satisfied_by(&supplied));
    }

    #[test]
    fn test_missing_variable_rejected() {
        let template = template_with_vars(&["first_name", "topic"]);
        let supplied = serde_json::json!({ "first_name": "Ada" });
        assert!(!template.variables_satisfied_by(&supplied));
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let template = template_with_vars(&["first_name", "topic"]);
        let supplied = serde_json::json!({ "first_name": "Ada", "topic": "pricing" });
        assert_eq!(template.render(&supplied), "Hi Ada, following up on pricing.");
    }

    #[test]
    fn test_no_variables_accepts_anything() {
        let template = template_with_vars(&[]);
        assert!(template.variables_satisfied_by(&serde_json::Value::Null));
    }
}
