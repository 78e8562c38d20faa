use std::path::{Path, PathBuf};

use tracing::info;
use walkdir::WalkDir;

use crate::console::{self, Status};
use crate::error::{Result, SiteError};
use crate::site::Site;
use crate::styles::{STATIC_URL_PREFIX, StyleBuild};

/// Outcome of rendering every route to disk
#[derive(Default)]
pub struct ExportReport {
    pub written: usize,
    pub failures: Vec<SiteError>,
}

pub async fn run_build(
    site_path: PathBuf,
    output_override: Option<PathBuf>,
    var_overrides: Vec<(String, String)>,
) -> Result<()> {
    console::start_build();
    console::status(Status::Building, site_path.display());

    let site = Site::load(site_path, &var_overrides).await?;
    let output_path =
        output_override.unwrap_or_else(|| site.site_path.join(&site.config.paths.output));

    info!(
        site = %site.site_path.display(),
        output = %output_path.display(),
        routes = site.routes.len(),
        "Building site"
    );

    if site.routes.is_empty() {
        console::status(Status::Warning, "no templates found, nothing to render");
    }

    check_output_path(&output_path, &site)?;
    clean_output_directory(&output_path).await?;

    let report = export_routes(&site, &output_path).await?;
    let asset_count =
        copy_static_assets(&site.static_dir(), &output_path.join(STATIC_URL_PREFIX.trim_matches('/')))
            .await?;
    let style_count = write_styles(&site.styles, &output_path).await?;

    console::warnings(&site.styles.failures);

    if !report.failures.is_empty() {
        let failed = report.failures.len();
        eprintln!();
        for failure in report.failures {
            console::report(failure);
        }
        return Err(SiteError::ExportFailed {
            failed: failed.into(),
            total: site.routes.len().into(),
        });
    }

    console::finished(format!(
        "{} pages, {} stylesheets, {} assets -> {}",
        report.written,
        style_count,
        asset_count,
        output_path.display()
    ));

    Ok(())
}

/// Absolute form of a path that may not exist yet, with symlinks resolved
/// through its nearest existing ancestor
fn resolve_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if parent.as_os_str().is_empty() => {
            resolve_path(Path::new(".")).join(name)
        }
        (Some(parent), Some(name)) => resolve_path(parent).join(name),
        _ => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

/// The output directory is deleted before every build. It must not be the
/// site itself, hold a source directory, or sit inside one.
fn check_output_path(output_path: &Path, site: &Site) -> Result<()> {
    let output = resolve_path(output_path);
    let refuse = |source_dir: &Path| SiteError::UnsafeOutput {
        output: output_path.into(),
        source_dir: source_dir.into(),
    };

    if resolve_path(&site.site_path).starts_with(&output) {
        return Err(refuse(&site.site_path));
    }

    for source_dir in [site.templates_dir(), site.static_dir(), site.styles_dir()] {
        let source = resolve_path(&source_dir);
        if source.starts_with(&output) || output.starts_with(&source) {
            return Err(refuse(&source_dir));
        }
    }

    Ok(())
}

async fn clean_output_directory(output_path: &Path) -> Result<()> {
    if output_path.exists() {
        info!("Cleaning output directory...");
        tokio::fs::remove_dir_all(output_path)
            .await
            .map_err(|e| SiteError::CreateDir {
                path: output_path.into(),
                cause: e,
            })?;
    }
    tokio::fs::create_dir_all(output_path)
        .await
        .map_err(|e| SiteError::CreateDir {
            path: output_path.into(),
            cause: e,
        })?;
    Ok(())
}

async fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SiteError::CreateDir {
                path: parent.into(),
                cause: e,
            })?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| SiteError::FileWrite {
            path: path.into(),
            cause: e,
        })
}

/// Render every route once, in order. A page that fails to render is recorded
/// and the rest are still written; IO failures abort.
pub async fn export_routes(site: &Site, output_path: &Path) -> Result<ExportReport> {
    let mut report = ExportReport::default();

    for entry in site.routes.iter() {
        let html = match site.render(entry) {
            Ok(html) => html,
            Err(e) => {
                console::page_failed(&entry.url, &entry.render_source);
                report.failures.push(e);
                continue;
            }
        };

        let output_file = url_to_output_path(&entry.url, output_path);
        info!(
            source = %entry.render_source,
            output = %output_file.display(),
            "Rendered page"
        );
        write_file(&output_file, html).await?;
        report.written += 1;
    }

    Ok(report)
}

/// `/` -> `index.html`, `/blog/` -> `blog/index.html`, `/404.html` -> `404.html`
pub fn url_to_output_path(url: &str, output_path: &Path) -> PathBuf {
    let relative = url.trim_matches('/');
    if url.ends_with('/') {
        if relative.is_empty() {
            output_path.join("index.html")
        } else {
            output_path.join(relative).join("index.html")
        }
    } else {
        output_path.join(relative)
    }
}

async fn copy_static_assets(static_dir: &Path, dest_dir: &Path) -> Result<usize> {
    let mut count = 0;

    if !static_dir.is_dir() {
        return Ok(count);
    }

    for entry in WalkDir::new(static_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let relative = path.strip_prefix(static_dir).unwrap_or(path);
        let output_file = dest_dir.join(relative);

        if let Some(parent) = output_file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SiteError::CreateDir {
                    path: parent.into(),
                    cause: e,
                })?;
        }

        tokio::fs::copy(path, &output_file)
            .await
            .map_err(|e| SiteError::CopyFile {
                src: path.into(),
                dest: (&output_file).into(),
                cause: e,
            })?;
        count += 1;
    }

    if count > 0 {
        info!(count, "Copied static assets");
    }

    Ok(count)
}

async fn write_styles(styles: &StyleBuild, output_path: &Path) -> Result<usize> {
    for style in &styles.styles {
        let dest = url_to_output_path(&style.url, output_path);
        info!(
            source = %style.source.display(),
            output = %dest.display(),
            "Writing stylesheet"
        );
        write_file(&dest, &style.css).await?;
    }
    Ok(styles.styles.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, name: &str, content: &str) {
        let path = root.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_url_to_output_path() {
        let out = Path::new("public");
        assert_eq!(url_to_output_path("/", out), PathBuf::from("public/index.html"));
        assert_eq!(
            url_to_output_path("/about/", out),
            PathBuf::from("public/about/index.html")
        );
        assert_eq!(
            url_to_output_path("/docs/guide/", out),
            PathBuf::from("public/docs/guide/index.html")
        );
        assert_eq!(url_to_output_path("/404.html", out), PathBuf::from("public/404.html"));
        assert_eq!(
            url_to_output_path("/static/css/main.css", out),
            PathBuf::from("public/static/css/main.css")
        );
    }

    #[tokio::test]
    async fn test_build_writes_site() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "config.toml", "[build]\nminify = false\n\n[vars]\nsite_name = \"Frost\"\n");
        write(
            root,
            "templates/layouts/base.html",
            "<title>{{ title }} | {{ site_name }}</title>{{ markdown }}",
        );
        write(root, "templates/index.md", "---\nlayout: base.html\ntitle: Home\n---\nHi");
        write(root, "templates/about/index.md", "About {{ site_name }}");
        write(root, "templates/404.md", "---\nlayout: base.html\ntitle: Lost\n---\nNope");
        write(root, "templates/_header.html", "partial");
        write(root, "static/logo.svg", "<svg></svg>");
        write(root, "styles/main.scss", ".a { .b { margin: 0; } }");

        run_build(root.to_path_buf(), None, vec![]).await.unwrap();

        let public = root.join("public");
        let index = std::fs::read_to_string(public.join("index.html")).unwrap();
        assert!(index.starts_with("<title>Home | Frost</title><p>Hi</p>"));

        let about = std::fs::read_to_string(public.join("about/index.html")).unwrap();
        assert_eq!(about.trim(), "<p>About Frost</p>");

        assert!(public.join("404.html").is_file());
        assert!(public.join("layouts/base/index.html").is_file());
        assert!(!public.join("_header").exists());
        assert_eq!(
            std::fs::read_to_string(public.join("static/logo.svg")).unwrap(),
            "<svg></svg>"
        );
        let css = std::fs::read_to_string(public.join("static/css/main.css")).unwrap();
        assert!(css.contains(".a .b"));
    }

    #[tokio::test]
    async fn test_build_cli_vars_and_output_override() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "templates/index.html", "{{ greeting }}");
        let out = root.join("elsewhere");

        run_build(
            root.to_path_buf(),
            Some(out.clone()),
            vec![("greeting".to_string(), "hello".to_string())],
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read_to_string(out.join("index.html")).unwrap(), "hello");
        assert!(!root.join("public").exists());
    }

    #[tokio::test]
    async fn test_failing_page_does_not_stop_others() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "config.toml", "[build]\nminify = false\n");
        write(root, "templates/a.md", "---\nlayout: missing.html\n---\nbroken");
        write(root, "templates/b.md", "fine");

        let err = run_build(root.to_path_buf(), None, vec![]).await.unwrap_err();
        match err {
            SiteError::ExportFailed { failed, total } => {
                assert_eq!(failed.0, 1);
                assert_eq!(total.0, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(root.join("public/b/index.html").is_file());
        assert!(!root.join("public/a/index.html").exists());
    }

    #[tokio::test]
    async fn test_broken_stylesheet_is_only_a_warning() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "templates/index.html", "ok");
        write(root, "styles/broken.scss", ".a { color: $nope; }");

        run_build(root.to_path_buf(), None, vec![]).await.unwrap();
        assert!(root.join("public/index.html").is_file());
        assert!(!root.join("public/static/css/broken.css").exists());
    }

    #[tokio::test]
    async fn test_output_over_sources_is_refused() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "templates/index.html", "ok");
        write(root, "static/logo.svg", "<svg></svg>");

        for output in [
            root.to_path_buf(),
            root.join("templates"),
            root.join("templates/out"),
            root.join("static"),
        ] {
            let err = run_build(root.to_path_buf(), Some(output.clone()), vec![])
                .await
                .unwrap_err();
            assert!(
                matches!(err, SiteError::UnsafeOutput { .. }),
                "{} was accepted: {err:?}",
                output.display()
            );
        }

        assert_eq!(
            std::fs::read_to_string(root.join("templates/index.html")).unwrap(),
            "ok"
        );
        assert!(root.join("static/logo.svg").is_file());
        assert!(!root.join("templates/out").exists());
    }

    #[test]
    fn test_resolve_path_of_missing_dir() {
        let dir = TempDir::new().unwrap();
        let base = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(resolve_path(&dir.path().join("a/b")), base.join("a/b"));
    }
}
