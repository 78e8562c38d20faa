use std::path::{Path, PathBuf};

use minijinja::{Environment, path_loader};
use tracing::warn;

use crate::context::{self, GlobalVars, RenderContext};
use crate::error::{Result, SiteError, SiteResultExt, TemplateHints};
use crate::frontmatter::{self, FrontMatter};

/// Directory (under the template root) that `layout:` names are looked up in
const LAYOUTS_DIR: &str = "layouts";

/// Create markdown options (can't be static due to non-Send callback fields)
fn markdown_options() -> markdown::Options {
    markdown::Options {
        parse: markdown::ParseOptions::gfm(),
        compile: markdown::CompileOptions {
            allow_any_img_src: true,
            allow_dangerous_html: true,
            allow_dangerous_protocol: true,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Template tag delimiters that must reach the template engine verbatim
const TAG_DELIMITERS: &[(&str, &str)] = &[("{{", "}}"), ("{%", "%}"), ("{#", "#}")];

/// Template tags cut out of a Markdown body while it is converted.
///
/// The converter escapes quotes, `<` and `&` in text, which would break
/// string literals and comparisons inside tags. Each tag is swapped for an
/// inert ASCII token and put back into the HTML afterwards.
struct ProtectedTags {
    tags: Vec<String>,
}

impl ProtectedTags {
    fn token(index: usize) -> String {
        format!("FROSTPAGETAG{}X", index)
    }

    fn extract(body: &str) -> (String, Self) {
        let mut text = String::with_capacity(body.len());
        let mut tags = Vec::new();
        let mut rest = body;

        while let Some(start) = rest.find('{') {
            let tail = &rest[start..];
            let closer = TAG_DELIMITERS
                .iter()
                .find(|(open, _)| tail.starts_with(open))
                .map(|(_, close)| *close);

            let Some(closer) = closer else {
                text.push_str(&rest[..=start]);
                rest = &rest[start + 1..];
                continue;
            };
            // Unclosed tag: leave the remainder for the template engine to report
            let Some(end) = tail[2..].find(closer) else {
                break;
            };

            let len = 2 + end + closer.len();
            text.push_str(&rest[..start]);
            text.push_str(&Self::token(tags.len()));
            tags.push(tail[..len].to_string());
            rest = &tail[len..];
        }
        text.push_str(rest);

        (text, Self { tags })
    }

    fn restore(&self, html: String) -> String {
        self.tags
            .iter()
            .enumerate()
            .fold(html, |html, (index, tag)| html.replace(&Self::token(index), tag))
    }
}

/// Convert a Markdown body to HTML, leaving template tags untouched
pub fn markdown_to_html(body: &str) -> std::result::Result<String, String> {
    let (text, tags) = ProtectedTags::extract(body);
    markdown::to_html_with_options(&text, &markdown_options())
        .map(|html| tags.restore(html))
        .map_err(|e| e.to_string())
}

/// A failed render, before it is attributed to a URL
#[derive(Debug)]
pub struct TemplateError {
    pub error: minijinja::Error,
    pub hints: TemplateHints,
    /// Name of the template the error points into
    pub name: String,
    /// Source of that template, for the error excerpt
    pub source: String,
}

impl TemplateError {
    pub fn into_site_error(self, url: &str) -> SiteError {
        SiteError::template_render(&self.name, url, &self.source, &self.error, &self.hints)
    }
}

/// The templating capability the pipeline renders through
pub trait TemplateEngine {
    /// Read a source file by its logical path; `SourceNotFound` when absent
    fn read_source(&self, name: &str) -> Result<String>;

    /// Render a template resolved by its logical path (`layouts/base.html`)
    fn render_named(
        &self,
        name: &str,
        ctx: &RenderContext,
    ) -> std::result::Result<String, TemplateError>;

    /// Render literal template source; `name` identifies it in errors
    fn render_inline(
        &self,
        name: &str,
        source: &str,
        ctx: &RenderContext,
    ) -> std::result::Result<String, TemplateError>;
}

/// MiniJinja environment loading templates from the site's template directory
pub struct SiteTemplates {
    env: Environment<'static>,
    root: PathBuf,
}

impl SiteTemplates {
    pub fn new(root: &Path) -> Self {
        let mut env = Environment::new();
        env.set_loader(path_loader(root));
        Self {
            env,
            root: root.to_path_buf(),
        }
    }

    fn failure(
        &self,
        error: minijinja::Error,
        ctx: &RenderContext,
        fallback_name: &str,
        fallback_source: Option<&str>,
    ) -> TemplateError {
        // The error may point into an included or extended template
        let name = error.name().unwrap_or(fallback_name).to_string();
        let source = match fallback_source {
            Some(source) if name == fallback_name => source.to_string(),
            _ => std::fs::read_to_string(self.root.join(&name)).unwrap_or_default(),
        };

        TemplateError {
            error,
            hints: TemplateHints::from_environment(&self.env).with_variables(ctx.keys()),
            name,
            source,
        }
    }
}

impl TemplateEngine for SiteTemplates {
    fn read_source(&self, name: &str) -> Result<String> {
        let path = self.root.join(name);
        std::fs::read_to_string(&path).with_file_read(&path)
    }

    fn render_named(
        &self,
        name: &str,
        ctx: &RenderContext,
    ) -> std::result::Result<String, TemplateError> {
        self.env
            .get_template(name)
            .and_then(|tmpl| tmpl.render(ctx.to_value()))
            .map_err(|e| self.failure(e, ctx, name, None))
    }

    fn render_inline(
        &self,
        name: &str,
        source: &str,
        ctx: &RenderContext,
    ) -> std::result::Result<String, TemplateError> {
        self.env
            .render_named_str(name, source, ctx.to_value())
            .map_err(|e| self.failure(e, ctx, name, Some(source)))
    }
}

/// How a Markdown document becomes its final output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderStrategy {
    /// Inject the body into `layouts/{name}`
    Layout(String),
    /// The rendered body is the whole page
    Inline,
}

impl RenderStrategy {
    pub fn from_front_matter(front_matter: &FrontMatter) -> Self {
        match front_matter.get("layout") {
            Some(layout) if !layout.trim().is_empty() => RenderStrategy::Layout(layout.clone()),
            _ => RenderStrategy::Inline,
        }
    }
}

pub fn layout_template_name(layout: &str) -> String {
    format!("{}/{}", LAYOUTS_DIR, layout)
}

/// Render a Markdown document: front matter, merged context, body, then layout.
///
/// The converted body is itself rendered as a template, so template syntax in
/// Markdown resolves against the page's context on both paths.
pub fn render_markdown(
    engine: &impl TemplateEngine,
    source_name: &str,
    url: &str,
    text: &str,
    globals: &GlobalVars,
) -> Result<String> {
    let (body, front_matter) = frontmatter::parse(text);
    let strategy = RenderStrategy::from_front_matter(&front_matter);
    let mut ctx = context::merge(&front_matter, globals);

    let body_html = markdown_to_html(body).map_err(|reason| SiteError::MarkdownParse {
        file: source_name.into(),
        reason,
    })?;

    let rendered_body = engine
        .render_inline(source_name, &body_html, &ctx)
        .map_err(|e| e.into_site_error(url))?;

    match strategy {
        RenderStrategy::Layout(layout) => {
            ctx.set_markdown(rendered_body);
            engine
                .render_named(&layout_template_name(&layout), &ctx)
                .map_err(|e| e.into_site_error(url))
        }
        RenderStrategy::Inline => {
            warn!(
                source = source_name,
                url, "No layout specified, using the rendered body as the page"
            );
            Ok(rendered_body)
        }
    }
}

/// Render a markup template directly with the global variables
pub fn render_template(
    engine: &impl TemplateEngine,
    name: &str,
    url: &str,
    globals: &GlobalVars,
) -> Result<String> {
    let ctx = RenderContext::from_globals(globals);
    engine
        .render_named(name, &ctx)
        .map_err(|e| e.into_site_error(url))
}
