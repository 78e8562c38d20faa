use std::collections::BTreeMap;

use minijinja::Value;

use crate::frontmatter::FrontMatter;

/// Key the rendered Markdown body is exposed under
pub const MARKDOWN_KEY: &str = "markdown";

/// Front-matter keys consumed by the pipeline instead of passed to templates
const RESERVED_KEYS: &[&str] = &["layout", MARKDOWN_KEY];

/// Variables supplied by the caller for every page (config `[vars]`, `--var`)
pub type GlobalVars = BTreeMap<String, Value>;

pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS
        .iter()
        .any(|reserved| key.eq_ignore_ascii_case(reserved))
}

/// Variables visible to a single document's templates
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    vars: BTreeMap<String, Value>,
}

impl RenderContext {
    /// A context holding only the global variables (non-Markdown templates)
    pub fn from_globals(globals: &GlobalVars) -> Self {
        Self {
            vars: globals.clone(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Store the rendered body; the value is marked safe so layouts don't escape it
    pub fn set_markdown(&mut self, html: String) {
        self.vars
            .insert(MARKDOWN_KEY.to_string(), Value::from_safe_string(html));
    }

    pub fn to_value(&self) -> Value {
        Value::from(self.vars.clone())
    }
}

/// Merge front matter with the global variables. Globals win over front matter.
pub fn merge(front_matter: &FrontMatter, globals: &GlobalVars) -> RenderContext {
    let mut vars: BTreeMap<String, Value> = front_matter
        .iter()
        .filter(|(key, _)| !is_reserved(key))
        .map(|(key, value)| (key.clone(), Value::from(value.as_str())))
        .collect();

    for (key, value) in globals {
        vars.insert(key.clone(), value.clone());
    }

    RenderContext { vars }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fm(pairs: &[(&str, &str)]) -> FrontMatter {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_globals_override_front_matter() {
        let mut globals = GlobalVars::new();
        globals.insert("title".to_string(), Value::from("B"));

        let ctx = merge(&fm(&[("title", "A"), ("author", "Ada")]), &globals);
        assert_eq!(ctx.vars.get("title").and_then(|v| v.as_str()), Some("B"));
        assert_eq!(ctx.vars.get("author").and_then(|v| v.as_str()), Some("Ada"));
    }

    #[test]
    fn test_reserved_keys_are_excluded() {
        let ctx = merge(
            &fm(&[("layout", "base.html"), ("Markdown", "<b>sneaky</b>"), ("LAYOUT", "x"), ("title", "T")]),
            &GlobalVars::new(),
        );
        assert!(!ctx.vars.contains_key("layout"));
        assert!(!ctx.vars.contains_key("LAYOUT"));
        assert!(!ctx.vars.contains_key("Markdown"));
        assert!(!ctx.vars.contains_key(MARKDOWN_KEY));
        assert_eq!(ctx.keys().collect::<Vec<_>>(), vec!["title"]);
    }

    #[test]
    fn test_markdown_key_always_wins() {
        let mut globals = GlobalVars::new();
        globals.insert(MARKDOWN_KEY.to_string(), Value::from("from globals"));

        let mut ctx = merge(&FrontMatter::new(), &globals);
        ctx.set_markdown("<p>body</p>".to_string());
        let value = ctx.vars.get(MARKDOWN_KEY).unwrap();
        assert_eq!(value.as_str(), Some("<p>body</p>"));
        assert!(value.is_safe());
    }

    #[test]
    fn test_context_renders_in_template() {
        let mut ctx = merge(&fm(&[("title", "Hello")]), &GlobalVars::new());
        ctx.set_markdown("<p>x</p>".to_string());

        let env = minijinja::Environment::new();
        let out = env
            .render_named_str("t.html", "<h1>{{ title }}</h1>{{ markdown }}", ctx.to_value())
            .unwrap();
        assert_eq!(out, "<h1>Hello</h1><p>x</p>");
    }
}
