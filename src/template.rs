//! Template rendering for edge transforms and template nodes.

use serde_json::Value;

use crate::error::{NodeError, NodeResult};

/// Render a Jinja template against a JSON context.
pub fn render(template: &str, context: &Value) -> NodeResult<String> {
    let env = minijinja::Environment::new();
    env.render_str(template, minijinja::Value::from_serialize(context))
        .map_err(|e| NodeError::Template(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_simple() {
        let out = render("hello {{ name }}", &json!({"name": "world"})).unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn test_render_nested_and_filters() {
        let ctx = json!({"value": {"items": ["a", "b", "c"]}});
        let out = render("{{ value.items | length }} items", &ctx).unwrap();
        assert_eq!(out, "3 items");
    }

    #[test]
    fn test_render_bad_template() {
        let err = render("{{ unclosed", &json!({})).unwrap_err();
        assert!(matches!(err, NodeError::Template(_)));
    }
}
