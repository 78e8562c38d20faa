use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::config::SiteConfig;
use crate::context::GlobalVars;
use crate::error::{Result, SiteError};
use crate::minify::{MinifyConfig, post_process};
use crate::render::{self, SiteTemplates, TemplateEngine};
use crate::route::{ResolvedRoute, TemplateFile, TemplateKind, is_partial};
use crate::styles::{StyleBuild, check_static_collisions, compile_styles};

/// URL of the page served when nothing else matches
pub const NOT_FOUND_URL: &str = "/404.html";

/// A URL and the document that renders it.
///
/// Holds only its own source identity; the file is read when rendered.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub url: String,
    /// Logical template name (`blog/post.md`)
    pub render_source: String,
    /// Absolute path of the source file
    pub source_path: PathBuf,
    pub kind: TemplateKind,
}

impl RouteEntry {
    fn new(route: ResolvedRoute, templates_dir: &Path) -> Self {
        Self {
            source_path: templates_dir.join(&route.render_source),
            url: route.url_path,
            render_source: route.render_source,
            kind: route.kind,
        }
    }

    /// Render this document, without post-processing
    pub fn render(&self, engine: &impl TemplateEngine, globals: &GlobalVars) -> Result<String> {
        match self.kind {
            TemplateKind::Markdown => {
                let text = engine.read_source(&self.render_source)?;
                render::render_markdown(engine, &self.render_source, &self.url, &text, globals)
            }
            TemplateKind::Template | TemplateKind::Other => {
                if !self.source_path.is_file() {
                    return Err(SiteError::SourceNotFound {
                        path: (&self.source_path).into(),
                    });
                }
                render::render_template(engine, &self.render_source, &self.url, globals)
            }
        }
    }
}

/// Every route produced by one enumeration pass, in source order
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    by_url: HashMap<String, usize>,
}

impl RouteTable {
    /// Add an entry; URLs must be unique within a pass
    pub fn register(&mut self, entry: RouteEntry) -> Result<()> {
        if let Some(&existing) = self.by_url.get(&entry.url) {
            return Err(SiteError::DuplicateRoute {
                url: entry.url.clone().into(),
                first: self.entries[existing].render_source.clone().into(),
                second: entry.render_source.into(),
            });
        }
        self.by_url.insert(entry.url.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    pub fn get(&self, url: &str) -> Option<&RouteEntry> {
        self.by_url.get(url).map(|&idx| &self.entries[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Walk the template directory and collect one route per file not named `_*`
pub fn generate(templates_dir: &Path) -> Result<RouteTable> {
    let mut table = RouteTable::default();

    let files = WalkDir::new(templates_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && !is_partial(&e.file_name().to_string_lossy()));

    for entry in files {
        let path = entry.path();
        let relative = path.strip_prefix(templates_dir).unwrap_or(path);
        let file = TemplateFile::from_relative_path(relative)
            .ok_or_else(|| SiteError::PathInvalidUtf8 { path: path.into() })?;

        let route = file.resolve();
        debug!(
            identifier = %route.identifier,
            extension = file.extension().unwrap_or_default(),
            url = %route.url_path,
            "Found route"
        );
        table.register(RouteEntry::new(route, templates_dir))?;
    }

    Ok(table)
}

/// Everything needed to render the site once
pub struct Site {
    pub site_path: PathBuf,
    pub config: SiteConfig,
    pub templates: SiteTemplates,
    pub routes: RouteTable,
    pub globals: GlobalVars,
    pub minify: MinifyConfig,
    pub styles: StyleBuild,
}

impl Site {
    pub async fn load(site_path: PathBuf, var_overrides: &[(String, String)]) -> Result<Site> {
        let config = SiteConfig::load(&site_path).await?;

        let templates_dir = site_path.join(&config.paths.templates);
        let styles_dir = site_path.join(&config.paths.styles);
        if !templates_dir.is_dir() {
            return Err(SiteError::TemplatesMissing {
                path: (&templates_dir).into(),
            });
        }

        let routes = generate(&templates_dir)?;
        let minify = MinifyConfig::new(config.build.minify);
        let styles = compile_styles(&styles_dir, &minify)?;
        check_static_collisions(&styles, &site_path.join(&config.paths.static_dir))?;
        let globals = config.global_vars(var_overrides);

        Ok(Site {
            templates: SiteTemplates::new(&templates_dir),
            site_path,
            config,
            routes,
            globals,
            minify,
            styles,
        })
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.site_path.join(&self.config.paths.templates)
    }

    pub fn static_dir(&self) -> PathBuf {
        self.site_path.join(&self.config.paths.static_dir)
    }

    pub fn styles_dir(&self) -> PathBuf {
        self.site_path.join(&self.config.paths.styles)
    }

    /// Render a route and post-process the output
    pub fn render(&self, entry: &RouteEntry) -> Result<String> {
        let output = entry.render(&self.templates, &self.globals)?;
        Ok(post_process(output, entry.kind, &self.minify))
    }

    pub fn not_found_route(&self) -> Option<&RouteEntry> {
        self.routes.get(NOT_FOUND_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::Value;
    use tempfile::TempDir;

    fn write(root: &Path, name: &str, content: &str) {
        let path = root.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn urls(table: &RouteTable) -> Vec<&str> {
        table.iter().map(|e| e.url.as_str()).collect()
    }

    #[test]
    fn test_generate_maps_every_file() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "index.md", "home");
        write(root, "contact.jinja", "contact");
        write(root, "about/index.md", "about");
        write(root, "errors/404.md", "missing");
        write(root, "layouts/base.html", "{{ markdown }}");

        let table = generate(root).unwrap();
        assert_eq!(
            urls(&table),
            vec!["/about/", "/contact/", "/404.html", "/", "/layouts/base/"]
        );
        assert_eq!(table.get("/about/").unwrap().render_source, "about/index.md");
        assert_eq!(table.get("/404.html").unwrap().kind, TemplateKind::Markdown);
    }

    #[test]
    fn test_generate_skips_partials() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "index.html", "home");
        write(root, "_nav.html", "nav");
        write(root, "blog/_draft.md", "draft");
        write(root, "_partials/_footer.html", "footer");

        let table = generate(root).unwrap();
        assert_eq!(urls(&table), vec!["/"]);
    }

    #[test]
    fn test_underscore_directories_are_still_routed() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "_drafts/post.md", "draft");
        write(root, "_partials/footer.html", "footer");

        let table = generate(root).unwrap();
        assert_eq!(urls(&table), vec!["/_drafts/post/", "/_partials/footer/"]);
        assert_eq!(
            table.get("/_drafts/post/").unwrap().render_source,
            "_drafts/post.md"
        );
    }

    #[test]
    fn test_generate_rejects_duplicate_urls() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "about.html", "a");
        write(root, "about.md", "b");

        let err = generate(root).unwrap_err();
        match err {
            SiteError::DuplicateRoute { url, first, second } => {
                assert_eq!(url.0, "/about/");
                assert_eq!(first.0, "about.html");
                assert_eq!(second.0, "about.md");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_entries_render_independently() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "layouts/page.html", "<h1>{{ title }}</h1>{{ markdown }}");
        write(root, "one.md", "---\nlayout: page.html\ntitle: One\n---\nfirst");
        write(root, "two.md", "---\nlayout: page.html\ntitle: Two\n---\nsecond");

        let table = generate(root).unwrap();
        let engine = SiteTemplates::new(root);
        let globals = GlobalVars::new();

        let one = table.get("/one/").unwrap().render(&engine, &globals).unwrap();
        let two = table.get("/two/").unwrap().render(&engine, &globals).unwrap();
        assert!(one.starts_with("<h1>One</h1><p>first</p>"));
        assert!(two.starts_with("<h1>Two</h1><p>second</p>"));
    }

    #[test]
    fn test_entry_reads_source_lazily() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "page.md", "before");

        let table = generate(root).unwrap();
        let entry = table.get("/page/").unwrap();
        let engine = SiteTemplates::new(root);

        write(root, "page.md", "after");
        let out = entry.render(&engine, &GlobalVars::new()).unwrap();
        assert_eq!(out.trim(), "<p>after</p>");

        std::fs::remove_file(root.join("page.md")).unwrap();
        let err = entry.render(&engine, &GlobalVars::new()).unwrap_err();
        assert!(matches!(err, SiteError::SourceNotFound { .. }));
    }

    #[test]
    fn test_template_entry_gets_globals() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "robots.txt", "Sitemap: {{ base_url }}/sitemap.xml");

        let table = generate(root).unwrap();
        let entry = table.get("/robots.txt/").unwrap();
        assert_eq!(entry.kind, TemplateKind::Other);

        let mut globals = GlobalVars::new();
        globals.insert("base_url".to_string(), Value::from("https://example.com"));
        let out = entry.render(&SiteTemplates::new(root), &globals).unwrap();
        assert_eq!(out, "Sitemap: https://example.com/sitemap.xml");
    }

    #[tokio::test]
    async fn test_site_load_and_render_minified() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "config.toml", "[vars]\nsite_name = \"Frost\"\n");
        write(
            root,
            "templates/index.html",
            "<html>\n  <body>\n    <h1>{{ site_name }}</h1>\n  </body>\n</html>\n",
        );
        write(root, "templates/feed.xml", "<feed>\n  <title>{{ site_name }}</title>\n</feed>");

        let site = Site::load(root.to_path_buf(), &[]).await.unwrap();
        assert_eq!(site.routes.len(), 2);

        let index = site.render(site.routes.get("/").unwrap()).unwrap();
        assert!(index.contains("<h1>Frost</h1>"));
        assert!(!index.contains("\n    "));

        let feed = site.render(site.routes.get("/feed.xml/").unwrap()).unwrap();
        assert_eq!(feed, "<feed>\n  <title>Frost</title>\n</feed>");
    }

    #[tokio::test]
    async fn test_site_load_requires_templates() {
        let dir = TempDir::new().unwrap();
        let err = Site::load(dir.path().to_path_buf(), &[]).await.err().unwrap();
        assert!(matches!(err, SiteError::TemplatesMissing { .. }));
    }
}
