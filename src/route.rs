use std::path::Path;

/// Suffixes removed from a filename to form its identifier, in this order
const TEMPLATE_SUFFIXES: &[&str] = &[".jinja", ".md", ".html"];

/// What kind of source a template file is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// Markdown with optional front matter
    Markdown,
    /// Structured markup (`.html`, `.htm`, `.jinja`)
    Template,
    /// Anything else the template engine can render (`robots.txt`, `feed.xml`, ...)
    Other,
}

impl TemplateKind {
    pub fn from_filename(filename: &str) -> Self {
        if filename.ends_with(".md") {
            TemplateKind::Markdown
        } else if [".html", ".htm", ".jinja"]
            .iter()
            .any(|ext| filename.ends_with(ext))
        {
            TemplateKind::Template
        } else {
            TemplateKind::Other
        }
    }

    /// Whether the rendered output is HTML and should go through minification
    pub fn is_html(self) -> bool {
        matches!(self, TemplateKind::Markdown | TemplateKind::Template)
    }
}

/// A template file, identified by its directory (relative to the template root) and filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFile {
    pub dir: String,
    pub filename: String,
}

impl TemplateFile {
    /// Build from a path relative to the template root, normalizing separators to `/`
    pub fn from_relative_path(relative: &Path) -> Option<Self> {
        let filename = relative.file_name()?.to_str()?.to_string();
        let dir = match relative.parent() {
            Some(parent) => parent
                .components()
                .map(|c| c.as_os_str().to_str())
                .collect::<Option<Vec<_>>>()?
                .join("/"),
            None => String::new(),
        };
        Some(Self { dir: normalize_dir(&dir), filename })
    }

    pub fn kind(&self) -> TemplateKind {
        TemplateKind::from_filename(&self.filename)
    }

    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.filename).extension().and_then(|e| e.to_str())
    }
}

/// Where a template file lands in the site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub identifier: String,
    pub url_path: String,
    /// `{dir}/{file}`, or `{file}` at the root
    pub render_source: String,
    pub kind: TemplateKind,
}

/// Partials (`_header.html`, `_/`) are never routed
pub fn is_partial(name: &str) -> bool {
    name.starts_with('_')
}

pub fn strip_template_suffixes(filename: &str) -> String {
    TEMPLATE_SUFFIXES
        .iter()
        .fold(filename.to_string(), |name, suffix| name.replace(suffix, ""))
}

fn is_numeric(identifier: &str) -> bool {
    !identifier.is_empty() && identifier.chars().all(|c| c.is_ascii_digit())
}

fn normalize_dir(dir: &str) -> String {
    dir.replace('\\', "/").trim_matches('/').to_string()
}

/// Map a template's directory and filename to its URL and render source
pub fn resolve(dir: &str, filename: &str) -> ResolvedRoute {
    let dir = normalize_dir(dir);
    let identifier = strip_template_suffixes(filename);

    let url_path = if identifier == "index" {
        if dir.is_empty() {
            String::from("/")
        } else {
            format!("/{}/", dir)
        }
    } else if is_numeric(&identifier) {
        // Error pages (404, 500) live flat at the site root
        format!("/{}.html", identifier)
    } else if dir.is_empty() {
        format!("/{}/", identifier)
    } else {
        format!("/{}/{}/", dir, identifier)
    };

    let render_source = if dir.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", dir, filename)
    };

    ResolvedRoute {
        identifier,
        url_path,
        render_source,
        kind: TemplateKind::from_filename(filename),
    }
}

impl TemplateFile {
    pub fn resolve(&self) -> ResolvedRoute {
        resolve(&self.dir, &self.filename)
    }
}
