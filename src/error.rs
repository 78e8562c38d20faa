use std::fmt;
use std::path::Path;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

// ANSI color codes for styled error output
const BOLD_CYAN: &str = "\x1b[1;36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// A path that displays with cyan highlighting
#[derive(Debug, Clone)]
pub struct StyledPath(pub String);

impl fmt::Display for StyledPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{BOLD_CYAN}{}{RESET}", self.0)
    }
}

impl From<&Path> for StyledPath {
    fn from(p: &Path) -> Self {
        StyledPath(p.display().to_string())
    }
}

impl From<String> for StyledPath {
    fn from(s: String) -> Self {
        StyledPath(s)
    }
}

impl From<&str> for StyledPath {
    fn from(s: &str) -> Self {
        StyledPath(s.to_string())
    }
}

impl From<&std::path::PathBuf> for StyledPath {
    fn from(p: &std::path::PathBuf) -> Self {
        StyledPath(p.display().to_string())
    }
}

/// A number that displays with bold highlighting
#[derive(Debug, Clone, Copy)]
pub struct StyledNum<T: fmt::Display>(pub T);

impl<T: fmt::Display> fmt::Display for StyledNum<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{BOLD}{}{RESET}", self.0)
    }
}

impl<T: fmt::Display> From<T> for StyledNum<T> {
    fn from(v: T) -> Self {
        StyledNum(v)
    }
}

/// Every error frostpage can report
#[derive(Error, Diagnostic, Debug)]
pub enum SiteError {
    // === Config Errors ===
    #[error("I couldn't parse your {path} file", path = StyledPath::from("config.toml"))]
    #[diagnostic(
        code(frostpage::config::parse),
        help("I had trouble understanding your TOML syntax. Common issues include missing quotes around strings or unclosed brackets.")
    )]
    ConfigParse {
        #[source_code]
        src: NamedSource<String>,
        #[label("the error is around here")]
        span: SourceSpan,
        reason: String,
    },

    #[error("I couldn't read the config file at {path}")]
    #[diagnostic(
        code(frostpage::config::read),
        help("Make sure the file exists and you have permission to read it.")
    )]
    ConfigRead {
        path: StyledPath,
        #[source]
        cause: std::io::Error,
    },

    // === Site Errors ===
    #[error("I couldn't find a templates directory at {path}")]
    #[diagnostic(
        code(frostpage::site::templates_missing),
        help("A frostpage site looks like this:\n\n  <site>/\n    config.toml      (optional)\n    templates/\n      layouts/\n        base.html\n      index.md\n    static/\n    styles/\n\nSet `paths.templates` in config.toml if your templates live somewhere else.")
    )]
    TemplatesMissing { path: StyledPath },

    #[error("Two templates want the same URL {url}")]
    #[diagnostic(
        code(frostpage::site::duplicate_route),
        help("Both {first} and {second} resolve to this URL. Rename one of them, or prefix it with `_` to turn it into a partial.")
    )]
    DuplicateRoute {
        url: StyledPath,
        first: StyledPath,
        second: StyledPath,
    },

    #[error("Two stylesheets want the same URL {url}")]
    #[diagnostic(
        code(frostpage::styles::duplicate),
        help("Both {first} and {second} end up at this URL. Rename one of them, or move the plain file out of the way.")
    )]
    DuplicateStyle {
        url: StyledPath,
        first: StyledPath,
        second: StyledPath,
    },

    #[error("I found a file path with characters I can't handle: {path}")]
    #[diagnostic(
        code(frostpage::path::invalid_utf8),
        help("File and directory names should use UTF-8 characters. Try renaming the file to use standard characters.")
    )]
    PathInvalidUtf8 { path: StyledPath },

    // === File Errors ===
    #[error("I couldn't find the source file at {path}")]
    #[diagnostic(
        code(frostpage::file::not_found),
        help("The file was there when I scanned the templates directory. If you moved or deleted it, rebuild the site.")
    )]
    SourceNotFound { path: StyledPath },

    #[error("I couldn't read the file at {path}")]
    #[diagnostic(code(frostpage::file::read))]
    FileRead {
        path: StyledPath,
        #[source]
        cause: std::io::Error,
    },

    #[error("I couldn't write to {path}")]
    #[diagnostic(code(frostpage::file::write))]
    FileWrite {
        path: StyledPath,
        #[source]
        cause: std::io::Error,
    },

    #[error("I won't use {output} as the output directory because it would wipe out {source_dir}")]
    #[diagnostic(
        code(frostpage::build::unsafe_output),
        help("The output directory is deleted before every build. Pick a directory that is outside your templates, static and styles directories and doesn't contain them, like the default `public`.")
    )]
    UnsafeOutput {
        output: StyledPath,
        source_dir: StyledPath,
    },

    #[error("I couldn't create the output directory at {path}")]
    #[diagnostic(code(frostpage::build::create_dir))]
    CreateDir {
        path: StyledPath,
        #[source]
        cause: std::io::Error,
    },

    #[error("I couldn't copy the file from {src} to {dest}")]
    #[diagnostic(code(frostpage::build::copy_file))]
    CopyFile {
        src: StyledPath,
        dest: StyledPath,
        #[source]
        cause: std::io::Error,
    },

    // === Render Errors ===
    #[error("I ran into a problem rendering {file} for {url}")]
    #[diagnostic(code(frostpage::template::render), help("{help_text}"))]
    TemplateRender {
        file: StyledPath,
        url: StyledPath,
        #[source_code]
        src: NamedSource<String>,
        #[label("{reason}")]
        span: SourceSpan,
        reason: String,
        help_text: String,
    },

    #[error("I couldn't convert the markdown in {file}")]
    #[diagnostic(
        code(frostpage::markdown::parse),
        help("There was a problem converting your markdown to HTML: {reason}")
    )]
    MarkdownParse { file: StyledPath, reason: String },

    #[error("I couldn't compile the stylesheet {file}")]
    #[diagnostic(
        code(frostpage::styles::compile),
        severity(warning),
        help("{reason}\n\nThe rest of the site is still built; this stylesheet is skipped until the error is fixed.")
    )]
    StyleCompile { file: StyledPath, reason: String },

    #[error("{failed} of {total} pages failed to render")]
    #[diagnostic(
        code(frostpage::build::export_failed),
        help("Every failing page is listed above. The other pages were written to the output directory.")
    )]
    ExportFailed {
        failed: StyledNum<usize>,
        total: StyledNum<usize>,
    },

    // === Server Errors ===
    #[error("I couldn't start the server on port {port}")]
    #[diagnostic(code(frostpage::server::port_bind))]
    PortBind {
        port: StyledNum<u16>,
        #[source_code]
        src: NamedSource<String>,
        #[label("this port is already in use")]
        span: SourceSpan,
        #[help]
        help_text: String,
        #[source]
        cause: std::io::Error,
    },

    #[error("I couldn't find an available port after trying ports {start_port} through {end_port}")]
    #[diagnostic(
        code(frostpage::server::no_available_port),
        help("All ports in the range are in use. Try specifying a different starting port:\n\n    frostpage dev <path> --port 9000")
    )]
    NoAvailablePort {
        start_port: StyledNum<u16>,
        end_port: StyledNum<u16>,
    },

    #[error("I couldn't start the file watcher")]
    #[diagnostic(
        code(frostpage::watcher::init),
        help("This is usually a system-level issue. Make sure you have permission to watch the directory and that the system's file watcher limit hasn't been reached.")
    )]
    WatcherInit {
        #[source]
        cause: notify::Error,
    },

    #[error("I couldn't watch the directory at {path}")]
    #[diagnostic(code(frostpage::watcher::path))]
    WatcherPath {
        path: StyledPath,
        #[source]
        cause: notify::Error,
    },

    #[error("The server encountered an error")]
    #[diagnostic(code(frostpage::server::runtime))]
    ServerRuntime {
        #[source]
        cause: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SiteError>;

impl SiteError {
    /// Create a config parse error with source span from a TOML error
    pub fn config_parse(path: &Path, content: &str, error: toml::de::Error) -> Self {
        let span = error
            .span()
            .map(|r| SourceSpan::new(r.start.into(), (r.end - r.start).max(1)))
            .unwrap_or_else(|| SourceSpan::from((0_usize, 1_usize)));

        SiteError::ConfigParse {
            src: NamedSource::new(path.display().to_string(), content.to_string()),
            span,
            reason: error.message().to_string(),
        }
    }

    /// Create a template render error pointing into the template that failed
    pub fn template_render(
        name: &str,
        url: &str,
        content: &str,
        error: &minijinja::Error,
        hints: &TemplateHints,
    ) -> Self {
        SiteError::TemplateRender {
            file: StyledPath::from(name),
            url: StyledPath::from(url),
            src: NamedSource::new(name.to_string(), content.to_string()),
            span: extract_template_span(error, content),
            reason: format_template_error_reason(error),
            help_text: template_error_help(error, hints),
        }
    }

    /// Create a port bind error with command source and highlighted port
    pub fn port_bind(path: &Path, port: u16, cause: std::io::Error) -> Self {
        use owo_colors::OwoColorize;

        let command = format!("frostpage dev {} --port {}", path.display(), port);
        let port_str = port.to_string();
        let port_start = command.rfind(&port_str).unwrap_or(0);
        let span = SourceSpan::new(port_start.into(), port_str.len());

        let alt_port = port.checked_add(1).unwrap_or(8081);
        let help_text = format!(
            "Port {} is already in use. You can either:\n\n  \
            1. Try a different port: {}\n\n  \
            2. Omit {} to let me find an available port automatically",
            port.bold(),
            format!("frostpage dev <path> --port {}", alt_port).cyan(),
            "--port".cyan().bold()
        );

        SiteError::PortBind {
            port: port.into(),
            src: NamedSource::new("command".to_string(), command),
            span,
            help_text,
            cause,
        }
    }
}

/// Source span of a MiniJinja error. Uses the byte range when available
/// (debug feature), otherwise the line number.
fn extract_template_span(error: &minijinja::Error, content: &str) -> SourceSpan {
    if let Some(range) = error.range() {
        let start = range.start.min(content.len());
        let end = range.end.min(content.len());
        let len = end.saturating_sub(start).max(1);
        return SourceSpan::new(start.into(), len);
    }

    if let Some(line_num) = error.line() {
        let offset: usize = content
            .lines()
            .take(line_num.saturating_sub(1))
            .map(|l| l.len() + 1)
            .sum();

        let line_len = content
            .lines()
            .nth(line_num.saturating_sub(1))
            .map(|l| l.len().max(1))
            .unwrap_or(1);

        return SourceSpan::new(offset.into(), line_len);
    }

    SourceSpan::from((0_usize, 1_usize))
}

fn format_template_error_reason(error: &minijinja::Error) -> String {
    // detail() is the message without the rendering context
    if let Some(detail) = error.detail() {
        return detail.to_string();
    }
    error.to_string()
}

/// Names known to the template environment, used for "did you mean" suggestions
#[derive(Debug, Clone, Default)]
pub struct TemplateHints {
    pub filters: Vec<String>,
    pub functions: Vec<String>,
    pub variables: Vec<String>,
}

impl TemplateHints {
    /// Functions come from the environment's globals; filters are the MiniJinja
    /// builtins since there is no introspection API for them.
    pub fn from_environment(env: &minijinja::Environment) -> Self {
        let functions = env.globals().map(|(name, _)| name.to_string()).collect();

        let filters = [
            "bool", "float", "int", "list", "string",
            "capitalize", "escape", "e", "lower", "replace", "safe", "split", "title", "trim", "upper", "urlencode",
            "batch", "chain", "first", "join", "last", "length", "lines", "reverse", "slice", "sort", "unique", "zip",
            "abs", "max", "min", "round", "sum",
            "attr", "dictsort", "items",
            "default", "d", "map", "reject", "rejectattr", "select", "selectattr",
            "groupby",
            "format", "indent", "pprint", "tojson",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self {
            filters,
            functions,
            variables: Vec::new(),
        }
    }

    /// The variables of the context the template was rendered with
    pub fn with_variables<'a>(mut self, names: impl Iterator<Item = &'a str>) -> Self {
        self.variables = names.map(String::from).collect();
        self
    }
}

/// Levenshtein distance, case-insensitive
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

fn find_best_match<'a>(name: &str, candidates: &'a [String]) -> Option<&'a str> {
    let max_distance = (name.len() / 2).max(2);

    candidates
        .iter()
        .filter_map(|candidate| {
            let distance = edit_distance(name, candidate);
            (distance <= max_distance && distance > 0).then_some((candidate.as_str(), distance))
        })
        .min_by_key(|(_, distance)| *distance)
        .map(|(candidate, _)| candidate)
}

/// Pull the offending identifier out of an error detail
fn extract_identifier(detail: &str) -> Option<&str> {
    for quote in ['`', '\''] {
        if let Some(start) = detail.find(quote) {
            let rest = &detail[start + 1..];
            if let Some(end) = rest.find(quote) {
                return Some(&rest[..end]);
            }
        }
    }

    // "filter NAME is unknown", "variable NAME is undefined", ...
    for pattern in ["filter ", "function ", "variable ", "test ", "method "] {
        if let Some(start) = detail.find(pattern) {
            let rest = &detail[start + pattern.len()..];
            let end = rest.find(' ').unwrap_or(rest.len());
            if end > 0 {
                return Some(&rest[..end]);
            }
        }
    }

    for suffix in [" is unknown", " is undefined"] {
        if let Some(pos) = detail.find(suffix) {
            let before = &detail[..pos];
            return match before.rfind(' ') {
                Some(start) => Some(&before[start + 1..]),
                None if !before.is_empty() => Some(before),
                None => None,
            };
        }
    }

    None
}

fn suggestion(identifier: Option<&str>, candidates: &[String]) -> String {
    identifier
        .and_then(|name| find_best_match(name, candidates))
        .map(|s| format!("Hint: Did you mean `{}`?\n\n", s))
        .unwrap_or_default()
}

fn template_error_help(error: &minijinja::Error, hints: &TemplateHints) -> String {
    use minijinja::ErrorKind;

    let identifier = extract_identifier(error.detail().unwrap_or_default());

    match error.kind() {
        ErrorKind::UndefinedError => {
            let available = if hints.variables.is_empty() {
                String::from("(none)")
            } else {
                hints.variables.join(", ")
            };
            format!(
                "I couldn't find this variable or attribute in the template context.\n\n{}\
                 Variables available to this page: {}\n\
                 Page variables come from front matter, `[vars]` in config.toml and `--var` on the command line.",
                suggestion(identifier, &hints.variables),
                available
            )
        }
        ErrorKind::UnknownFilter => format!(
            "I don't recognize this filter.\n\n{}\
             Here are some filters you can use:\n\
             - Text: safe, escape, lower, upper, title, trim, replace\n\
             - Lists: first, last, length, reverse, sort, join\n\
             - Values: default, int, float, abs, round",
            suggestion(identifier, &hints.filters)
        ),
        ErrorKind::UnknownFunction => format!(
            "I don't recognize this function.\n\n{}Available functions: {}",
            suggestion(identifier, &hints.functions),
            hints.functions.join(", ")
        ),
        ErrorKind::TemplateNotFound => "I couldn't find this template.\n\n\
             Template names are relative to the templates directory, e.g. `layouts/base.html`.\n\
             A Markdown page with `layout: base.html` renders `layouts/base.html`."
            .to_string(),
        ErrorKind::SyntaxError => "I had trouble parsing this template.\n\n\
             Here are some things to check:\n\
             - Are all your {{ braces }} and {% blocks %} properly closed?\n\
             - Do you have matching {% endif %}, {% endfor %}, etc.?\n\
             - Are strings properly quoted?"
            .to_string(),
        ErrorKind::MissingArgument => "It looks like this function is missing a required argument."
            .to_string(),
        ErrorKind::TooManyArguments => "This function received more arguments than it expects."
            .to_string(),
        ErrorKind::InvalidOperation => "I can't perform this operation on these types of values.\n\n\
             For example, you can't add a string to a number, or access \
             an attribute on something that isn't an object."
            .to_string(),
        _ => "I ran into a problem with this template.\n\n\
             Here are some things to check:\n\
             - Are all your {{ braces }} and {% blocks %} properly closed?\n\
             - Are you referencing variables that exist?\n\
             - Are filters and functions spelled correctly?"
            .to_string(),
    }
}

/// Extension trait for adding file context to IO results
pub trait SiteResultExt<T> {
    fn with_file_read(self, path: &Path) -> Result<T>;
}

impl<T> SiteResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_file_read(self, path: &Path) -> Result<T> {
        self.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SiteError::SourceNotFound {
                    path: StyledPath::from(path),
                }
            } else {
                SiteError::FileRead {
                    path: StyledPath::from(path),
                    cause: e,
                }
            }
        })
    }
}

/// Render an error as an HTML page for the browser during development
pub fn render_error_html(error: &SiteError, dev_script: &str) -> String {
    let error_text = format!("{:?}", miette::Report::new(error.clone()));

    let escaped = ansi_to_html::convert(&error_text)
        .unwrap_or_else(|_| {
            error_text
                .replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;")
        })
        .replace('\n', "<br>");

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Error - frostpage</title>
    <style>
        body {{
            font-family: 'SF Mono', 'Menlo', 'Monaco', 'Consolas', monospace;
            background-color: #0f1b2d;
            color: #e6eef7;
            padding: 2rem;
            margin: 0;
            line-height: 1.6;
        }}
        .error-container {{
            max-width: 900px;
            margin: 0 auto;
            background: #162a44;
            border-radius: 8px;
            padding: 2rem;
            border-left: 4px solid #ff6b6b;
        }}
        .error-title {{
            color: #ff6b6b;
            font-size: 1.2rem;
            margin-bottom: 1rem;
        }}
        .error-content {{
            white-space: pre-wrap;
            font-size: 0.9rem;
            overflow-x: auto;
        }}
    </style>
</head>
<body>
    <div class="error-container">
        <div class="error-title">Something went wrong</div>
        <div class="error-content">{}</div>
    </div>
    {}
</body>
</html>"#,
        escaped, dev_script
    )
}

fn clone_io(cause: &std::io::Error) -> std::io::Error {
    std::io::Error::new(cause.kind(), cause.to_string())
}

fn clone_source(src: &NamedSource<String>) -> NamedSource<String> {
    NamedSource::new(src.name().to_string(), src.inner().clone())
}

// Errors are kept in dev-server state and re-rendered per request
impl Clone for SiteError {
    fn clone(&self) -> Self {
        match self {
            SiteError::ConfigParse { src, span, reason } => SiteError::ConfigParse {
                src: clone_source(src),
                span: *span,
                reason: reason.clone(),
            },
            SiteError::ConfigRead { path, cause } => SiteError::ConfigRead {
                path: path.clone(),
                cause: clone_io(cause),
            },
            SiteError::TemplatesMissing { path } => SiteError::TemplatesMissing { path: path.clone() },
            SiteError::DuplicateRoute { url, first, second } => SiteError::DuplicateRoute {
                url: url.clone(),
                first: first.clone(),
                second: second.clone(),
            },
            SiteError::DuplicateStyle { url, first, second } => SiteError::DuplicateStyle {
                url: url.clone(),
                first: first.clone(),
                second: second.clone(),
            },
            SiteError::UnsafeOutput { output, source_dir } => SiteError::UnsafeOutput {
                output: output.clone(),
                source_dir: source_dir.clone(),
            },
            SiteError::PathInvalidUtf8 { path } => SiteError::PathInvalidUtf8 { path: path.clone() },
            SiteError::SourceNotFound { path } => SiteError::SourceNotFound { path: path.clone() },
            SiteError::FileRead { path, cause } => SiteError::FileRead {
                path: path.clone(),
                cause: clone_io(cause),
            },
            SiteError::FileWrite { path, cause } => SiteError::FileWrite {
                path: path.clone(),
                cause: clone_io(cause),
            },
            SiteError::CreateDir { path, cause } => SiteError::CreateDir {
                path: path.clone(),
                cause: clone_io(cause),
            },
            SiteError::CopyFile { src, dest, cause } => SiteError::CopyFile {
                src: src.clone(),
                dest: dest.clone(),
                cause: clone_io(cause),
            },
            SiteError::TemplateRender { file, url, src, span, reason, help_text } => {
                SiteError::TemplateRender {
                    file: file.clone(),
                    url: url.clone(),
                    src: clone_source(src),
                    span: *span,
                    reason: reason.clone(),
                    help_text: help_text.clone(),
                }
            }
            SiteError::MarkdownParse { file, reason } => SiteError::MarkdownParse {
                file: file.clone(),
                reason: reason.clone(),
            },
            SiteError::StyleCompile { file, reason } => SiteError::StyleCompile {
                file: file.clone(),
                reason: reason.clone(),
            },
            SiteError::ExportFailed { failed, total } => SiteError::ExportFailed {
                failed: *failed,
                total: *total,
            },
            SiteError::PortBind { port, src, span, help_text, cause } => SiteError::PortBind {
                port: *port,
                src: clone_source(src),
                span: *span,
                help_text: help_text.clone(),
                cause: clone_io(cause),
            },
            SiteError::NoAvailablePort { start_port, end_port } => SiteError::NoAvailablePort {
                start_port: *start_port,
                end_port: *end_port,
            },
            SiteError::WatcherInit { cause } => SiteError::WatcherInit {
                cause: notify::Error::generic(&cause.to_string()),
            },
            SiteError::WatcherPath { path, cause } => SiteError::WatcherPath {
                path: path.clone(),
                cause: notify::Error::generic(&cause.to_string()),
            },
            SiteError::ServerRuntime { cause } => SiteError::ServerRuntime {
                cause: clone_io(cause),
            },
        }
    }
}
