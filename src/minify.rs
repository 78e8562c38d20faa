use minify_html::Cfg;

use crate::route::TemplateKind;

/// The `[build] minify` switch, shared by page and stylesheet output
#[derive(Debug, Clone, Copy)]
pub struct MinifyConfig {
    pub enabled: bool,
}

impl MinifyConfig {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Output style handed to the stylesheet compiler
    pub fn css_style(&self) -> grass::OutputStyle {
        if self.enabled {
            grass::OutputStyle::Compressed
        } else {
            grass::OutputStyle::Expanded
        }
    }
}

fn page_cfg() -> Cfg {
    Cfg {
        minify_css: true,
        minify_js: false,
        ..Cfg::default()
    }
}

/// Collapse insignificant whitespace in an HTML document
pub fn minify_html_content(html: &str, config: &MinifyConfig) -> String {
    if !config.enabled {
        return html.to_string();
    }

    String::from_utf8(minify_html::minify(html.as_bytes(), &page_cfg()))
        .unwrap_or_else(|_| html.to_string())
}

/// Last step for every rendered route. Markdown and markup pages are
/// minified; other kinds (`robots.txt`, `feed.xml`) pass through untouched.
pub fn post_process(output: String, kind: TemplateKind, config: &MinifyConfig) -> String {
    if kind.is_html() {
        minify_html_content(&output, config)
    } else {
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "<!DOCTYPE html>\n<html>\n  <body>\n    <div>\n      <p>Hello    <b>world</b></p>\n    </div>\n  </body>\n</html>\n";

    #[test]
    fn test_disabled_passes_through() {
        let config = MinifyConfig::new(false);
        assert_eq!(minify_html_content(PAGE, &config), PAGE);
        assert_eq!(post_process(PAGE.to_string(), TemplateKind::Markdown, &config), PAGE);
    }

    #[test]
    fn test_enabled_shrinks_output() {
        let out = minify_html_content(PAGE, &MinifyConfig::new(true));
        assert!(out.len() < PAGE.len());
        assert!(out.contains("Hello"));
        assert!(!out.contains("\n    "));
    }

    #[test]
    fn test_minify_is_idempotent() {
        let config = MinifyConfig::new(true);
        let once = minify_html_content(PAGE, &config);
        let twice = minify_html_content(&once, &config);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_post_process_only_touches_html_kinds() {
        let config = MinifyConfig::new(true);
        let markdown = post_process(PAGE.to_string(), TemplateKind::Markdown, &config);
        let template = post_process(PAGE.to_string(), TemplateKind::Template, &config);
        assert!(markdown.len() < PAGE.len());
        assert_eq!(markdown, template);

        let feed = "<feed>\n  <title>x</title>\n</feed>\n";
        assert_eq!(post_process(feed.to_string(), TemplateKind::Other, &config), feed);
    }

    #[test]
    fn test_css_style_follows_switch() {
        assert!(matches!(
            MinifyConfig::new(true).css_style(),
            grass::OutputStyle::Compressed
        ));
        assert!(matches!(
            MinifyConfig::new(false).css_style(),
            grass::OutputStyle::Expanded
        ));
    }
}
