//! Template rendering
//!
//! Views name a chain of templates, most specific first, and the renderer
//! uses the first one it has. The bundled templates under `kibble/` can be
//! overridden file by file from a template directory.

use crate::core::error::TemplateError;
use std::path::Path;
use tera::Tera;

/// Renders the first existing template of a chain
pub trait TemplateRenderer: Send + Sync {
    fn has_template(&self, name: &str) -> bool;

    fn render_template(&self, name: &str, context: &tera::Context) -> Result<String, TemplateError>;

    fn render(&self, templates: &[String], context: &tera::Context) -> Result<String, TemplateError> {
        let name = templates
            .iter()
            .find(|name| self.has_template(name))
            .ok_or_else(|| TemplateError::NotFound {
                candidates: templates.to_vec(),
            })?;
        self.render_template(name, context)
    }
}

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("kibble/base.html", include_str!("../../templates/kibble/base.html")),
    ("kibble/macros.html", include_str!("../../templates/kibble/macros.html")),
    ("kibble/index.html", include_str!("../../templates/kibble/index.html")),
    ("kibble/list.html", include_str!("../../templates/kibble/list.html")),
    ("kibble/list.need_index.html", include_str!("../../templates/kibble/list.need_index.html")),
    ("kibble/create.html", include_str!("../../templates/kibble/create.html")),
    ("kibble/edit.html", include_str!("../../templates/kibble/edit.html")),
    ("kibble/operation.html", include_str!("../../templates/kibble/operation.html")),
    ("kibble/dismiss_popup.html", include_str!("../../templates/kibble/dismiss_popup.html")),
    ("kibble/polymodel/picker.html", include_str!("../../templates/kibble/polymodel/picker.html")),
    ("kibble/403.html", include_str!("../../templates/kibble/403.html")),
    ("kibble/404.html", include_str!("../../templates/kibble/404.html")),
];

/// [`TemplateRenderer`] backed by Tera
pub struct TeraRenderer {
    tera: Tera,
}

impl TeraRenderer {
    /// Bundled templates, overridden by any `.html` file under `template_dir`
    pub fn new(template_dir: Option<&str>) -> Result<Self, TemplateError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(BUILTIN_TEMPLATES.iter().copied())
            .map_err(|e| render_error("<bundled>", &e))?;

        if let Some(dir) = template_dir {
            let root = Path::new(dir);
            let mut files = Vec::new();
            collect_templates(root, root, &mut files).map_err(|e| TemplateError::Render {
                name: dir.to_string(),
                message: e.to_string(),
            })?;
            tracing::debug!(dir = %dir, count = files.len(), "loading template overrides");
            tera.add_template_files(files.iter().map(|(path, name)| (path.as_path(), Some(name.as_str()))))
                .map_err(|e| render_error(dir, &e))?;
        }
        Ok(Self { tera })
    }

    pub fn template_names(&self) -> Vec<&str> {
        self.tera.get_template_names().collect()
    }
}

impl TemplateRenderer for TeraRenderer {
    fn has_template(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|n| n == name)
    }

    fn render_template(&self, name: &str, context: &tera::Context) -> Result<String, TemplateError> {
        self.tera.render(name, context).map_err(|e| render_error(name, &e))
    }
}

/// Tera nests the useful message in the error's sources
fn render_error(name: &str, err: &tera::Error) -> TemplateError {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    TemplateError::Render {
        name: name.to_string(),
        message,
    }
}

fn collect_templates(
    root: &Path,
    dir: &Path,
    files: &mut Vec<(std::path::PathBuf, String)>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_templates(root, &path, files)?;
        } else if path.extension().is_some_and(|ext| ext == "html") {
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((path.clone(), name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_bundled_templates_load() {
        let renderer = TeraRenderer::new(None).unwrap();
        assert!(renderer.has_template("kibble/list.html"));
        assert!(renderer.has_template("kibble/polymodel/picker.html"));
        assert!(!renderer.has_template("kibble/author/list.html"));
    }

    #[test]
    fn test_first_existing_template_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("kibble/author")).unwrap();
        fs::write(dir.path().join("kibble/author/list.html"), "authors: {{ count }}").unwrap();

        let renderer = TeraRenderer::new(dir.path().to_str()).unwrap();
        let mut context = tera::Context::new();
        context.insert("count", &3);

        let chain = vec![
            "kibble/author/book/list.html".to_string(),
            "kibble/author/list.html".to_string(),
            "kibble/list.html".to_string(),
        ];
        assert_eq!(renderer.render(&chain, &context).unwrap(), "authors: 3");
    }

    #[test]
    fn test_overrides_replace_bundled_templates() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("kibble")).unwrap();
        fs::write(dir.path().join("kibble/404.html"), "gone").unwrap();

        let renderer = TeraRenderer::new(dir.path().to_str()).unwrap();
        let rendered = renderer
            .render(&["kibble/404.html".to_string()], &tera::Context::new())
            .unwrap();
        assert_eq!(rendered, "gone");
    }

    #[test]
    fn test_missing_chain_lists_candidates() {
        let renderer = TeraRenderer::new(None).unwrap();
        let err = renderer
            .render(&["kibble/nope.html".to_string()], &tera::Context::new())
            .unwrap_err();
        assert!(matches!(err, TemplateError::NotFound { candidates } if candidates == ["kibble/nope.html"]));
    }
}
