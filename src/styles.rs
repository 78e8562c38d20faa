use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{Result, SiteError};
use crate::minify::MinifyConfig;
use crate::route::is_partial;

/// URL prefix everything in the static directory is published under
pub const STATIC_URL_PREFIX: &str = "/static/";

/// URL prefix compiled stylesheets are published under
pub const STYLES_URL_PREFIX: &str = "/static/css/";

const STYLE_EXTENSIONS: &[&str] = &["scss", "sass", "css"];

#[derive(Debug, Clone)]
pub struct CompiledStyle {
    pub url: String,
    pub source: PathBuf,
    pub css: String,
}

/// Compiled stylesheets plus the ones that failed. Failures never stop the build.
#[derive(Debug, Default, Clone)]
pub struct StyleBuild {
    pub styles: Vec<CompiledStyle>,
    pub failures: Vec<SiteError>,
}

impl StyleBuild {
    pub fn get(&self, url: &str) -> Option<&CompiledStyle> {
        self.styles.iter().find(|style| style.url == url)
    }
}

fn is_stylesheet(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| STYLE_EXTENSIONS.contains(&ext))
}

/// `main.scss` -> `/static/css/main.css`, `themes/dark.sass` -> `/static/css/themes/dark.css`
pub fn style_url(relative: &Path) -> String {
    let stem = relative
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}{}.css", STYLES_URL_PREFIX, stem)
}

/// Compile every stylesheet under `styles_dir` not named `_*`.
///
/// Two sources mapping to one URL is an error; a source that fails to compile
/// is only collected as a warning.
pub fn compile_styles(styles_dir: &Path, minify: &MinifyConfig) -> Result<StyleBuild> {
    let mut build = StyleBuild::default();

    if !styles_dir.is_dir() {
        return Ok(build);
    }

    let entries = WalkDir::new(styles_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_type().is_file()
                && is_stylesheet(e.path())
                && !is_partial(&e.file_name().to_string_lossy())
        });

    let options = grass::Options::default().style(minify.css_style());
    let mut claimed: HashMap<String, PathBuf> = HashMap::new();

    for entry in entries {
        let path = entry.path();
        let relative = path.strip_prefix(styles_dir).unwrap_or(path);
        let url = style_url(relative);

        if let Some(first) = claimed.get(&url) {
            return Err(SiteError::DuplicateStyle {
                url: url.into(),
                first: first.into(),
                second: relative.into(),
            });
        }
        claimed.insert(url.clone(), relative.to_path_buf());

        match grass::from_path(path, &options) {
            Ok(css) => {
                info!(source = %relative.display(), url = %url, "Compiled stylesheet");
                build.styles.push(CompiledStyle {
                    url,
                    source: path.to_path_buf(),
                    css,
                });
            }
            Err(e) => {
                warn!(source = %relative.display(), "Stylesheet failed to compile");
                build.failures.push(SiteError::StyleCompile {
                    file: relative.into(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(build)
}

/// Compiled styles are published under the static prefix; a real file at the
/// same place in the static directory would be shadowed.
pub fn check_static_collisions(build: &StyleBuild, static_dir: &Path) -> Result<()> {
    for style in &build.styles {
        let Some(relative) = style.url.strip_prefix(STATIC_URL_PREFIX) else {
            continue;
        };
        let shadowed = static_dir.join(relative);
        if shadowed.is_file() {
            return Err(SiteError::DuplicateStyle {
                url: style.url.clone().into(),
                first: (&shadowed).into(),
                second: (&style.source).into(),
            });
        }
    }
    Ok(())
}
