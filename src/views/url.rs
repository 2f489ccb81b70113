//! URL patterns of admin views
//!
//! Patterns are written as templates such as `/{ancestor_key}/{kind_lower}/`
//! or `/{kind_lower}/page-<int:page>/`. Each one is compiled twice: into a
//! regex for matching incoming paths and into a builder for links.

use crate::core::error::ConfigError;
use crate::core::key::Key;
use crate::core::request::ViewArgs;
use regex::Regex;

/// A pattern template with its build-time defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    pub template: String,
    /// Page number the pattern stands for when it has no page placeholder
    pub default_page: Option<usize>,
}

impl UrlPattern {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            default_page: None,
        }
    }

    pub fn with_default_page(mut self, page: usize) -> Self {
        self.default_page = Some(page);
        self
    }

    pub fn uses_key(&self) -> bool {
        self.template.contains("{key}")
    }

    pub fn uses_ancestor(&self) -> bool {
        self.template.contains("{ancestor_key}")
    }

    pub fn uses_page(&self) -> bool {
        self.template.contains("<int:page>")
    }
}

/// Names substituted into a pattern for one view
#[derive(Debug, Clone)]
pub struct PatternContext<'a> {
    pub kind: &'a str,
    pub action: &'a str,
    /// Kinds of the view's ancestors, root first
    pub ancestor_kinds: &'a [String],
}

impl PatternContext<'_> {
    fn key_kinds(&self) -> Vec<&str> {
        self.ancestor_kinds
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.kind))
            .collect()
    }

    fn ancestor_kinds(&self) -> Vec<&str> {
        self.ancestor_kinds.iter().map(String::as_str).collect()
    }
}

fn key_regex(kinds: &[&str]) -> String {
    kinds
        .iter()
        .map(|kind| format!("{}-[^/]+", regex::escape(&kind.to_lowercase())))
        .collect::<Vec<_>>()
        .join("/")
}

fn kinds_match(key: &Key, kinds: &[&str]) -> bool {
    key.kinds() == kinds
}

/// A pattern compiled for one view
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pattern: UrlPattern,
    regex: Regex,
    key_kinds: Vec<String>,
    ancestor_kinds: Vec<String>,
    kind: String,
    action: String,
}

impl CompiledPattern {
    pub fn compile(pattern: &UrlPattern, context: &PatternContext<'_>) -> Result<Self, ConfigError> {
        let key_kinds = context.key_kinds();
        let ancestor_kinds = context.ancestor_kinds();

        let source = Self::substitute(&pattern.template, context, |part| match part {
            Part::Literal(text) => regex::escape(text),
            Part::Key => format!("(?P<key>{})", key_regex(&key_kinds)),
            Part::Ancestor => format!("(?P<ancestor_key>{})", key_regex(&ancestor_kinds)),
            Part::Page => r"(?P<page>\d+)".to_string(),
        });
        let regex = Regex::new(&format!("^{}$", source)).map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.template.clone(),
            message: e.to_string(),
        })?;

        Ok(Self {
            pattern: pattern.clone(),
            regex,
            key_kinds: key_kinds.iter().map(|k| k.to_string()).collect(),
            ancestor_kinds: ancestor_kinds.iter().map(|k| k.to_string()).collect(),
            kind: context.kind.to_string(),
            action: context.action.to_string(),
        })
    }

    pub fn pattern(&self) -> &UrlPattern {
        &self.pattern
    }

    /// Match a path relative to the admin prefix
    pub fn matches(&self, path: &str) -> Option<ViewArgs> {
        let captures = self.regex.captures(path)?;
        let key_kinds: Vec<&str> = self.key_kinds.iter().map(String::as_str).collect();
        let ancestor_kinds: Vec<&str> = self.ancestor_kinds.iter().map(String::as_str).collect();

        let key = match captures.name("key") {
            Some(m) => Some(Key::from_url_path(&key_kinds, m.as_str()).ok()?),
            None => None,
        };
        let ancestor_key = match captures.name("ancestor_key") {
            Some(m) => Some(Key::from_url_path(&ancestor_kinds, m.as_str()).ok()?),
            None => None,
        };
        let page = match captures.name("page") {
            Some(m) => Some(m.as_str().parse::<usize>().ok()?),
            None => None,
        };

        Some(ViewArgs {
            key,
            ancestor_key,
            page,
        })
    }

    /// Build the path for the given arguments, if this pattern accepts them
    ///
    /// A page equal to the pattern's default counts as no page.
    pub fn build(&self, key: Option<&Key>, ancestor: Option<&Key>, page: Option<usize>) -> Option<String> {
        let page = page.filter(|p| Some(*p) != self.pattern.default_page && *p != 1);

        if self.pattern.uses_key() && key.is_none() {
            return None;
        }
        if self.pattern.uses_ancestor() != ancestor.is_some() {
            return None;
        }
        if self.pattern.uses_page() != page.is_some() {
            return None;
        }

        let key_kinds: Vec<&str> = self.key_kinds.iter().map(String::as_str).collect();
        let ancestor_kinds: Vec<&str> = self.ancestor_kinds.iter().map(String::as_str).collect();
        if let Some(key) = key.filter(|_| self.pattern.uses_key()) {
            if !kinds_match(key, &key_kinds) {
                return None;
            }
        }
        if let Some(ancestor) = ancestor {
            if !kinds_match(ancestor, &ancestor_kinds) {
                return None;
            }
        }

        let context = PatternContext {
            kind: &self.kind,
            action: &self.action,
            ancestor_kinds: &self.ancestor_kinds,
        };
        Some(Self::substitute(&self.pattern.template, &context, |part| match part {
            Part::Literal(text) => text.to_string(),
            Part::Key => key.map(Key::to_url_path).unwrap_or_default(),
            Part::Ancestor => ancestor.map(Key::to_url_path).unwrap_or_default(),
            Part::Page => page.map(|p| p.to_string()).unwrap_or_default(),
        }))
    }

    /// Walk the template, resolving name placeholders and handing the rest
    /// to `render`
    fn substitute<F>(template: &str, context: &PatternContext<'_>, mut render: F) -> String
    where
        F: FnMut(Part<'_>) -> String,
    {
        let kind_lower = context.kind.to_lowercase();
        let mut output = String::new();
        let mut rest = template;

        while !rest.is_empty() {
            let next = [rest.find('{'), rest.find("<int:page>")]
                .into_iter()
                .flatten()
                .min();
            let Some(start) = next else {
                output.push_str(&render(Part::Literal(rest)));
                break;
            };
            if start > 0 {
                output.push_str(&render(Part::Literal(&rest[..start])));
            }
            rest = &rest[start..];

            if let Some(after) = rest.strip_prefix("<int:page>") {
                output.push_str(&render(Part::Page));
                rest = after;
                continue;
            }

            let Some(end) = rest.find('}') else {
                output.push_str(&render(Part::Literal(rest)));
                break;
            };
            let name = &rest[1..end];
            rest = &rest[end + 1..];
            let rendered = match name {
                "key" => render(Part::Key),
                "ancestor_key" => render(Part::Ancestor),
                "kind" => render(Part::Literal(context.kind)),
                "kind_lower" => render(Part::Literal(&kind_lower)),
                "action" => render(Part::Literal(context.action)),
                other => render(Part::Literal(&format!("{{{}}}", other))),
            };
            output.push_str(&rendered);
        }
        output
    }
}

enum Part<'a> {
    Literal(&'a str),
    Key,
    Ancestor,
    Page,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(template: &str, ancestors: &[&str]) -> CompiledPattern {
        let ancestor_kinds: Vec<String> = ancestors.iter().map(|a| a.to_string()).collect();
        let context = PatternContext {
            kind: "Book",
            action: "list",
            ancestor_kinds: &ancestor_kinds,
        };
        CompiledPattern::compile(&UrlPattern::new(template), &context).unwrap()
    }

    #[test]
    fn test_match_kind_pattern() {
        let pattern = compile("/{kind_lower}/page-<int:page>/", &[]);
        let args = pattern.matches("/book/page-3/").unwrap();
        assert_eq!(args.page, Some(3));
        assert!(pattern.matches("/book/").is_none());
        assert!(pattern.matches("/author/page-3/").is_none());
    }

    #[test]
    fn test_match_key_pattern() {
        let pattern = compile("/{key}/", &["Author"]);
        let args = pattern.matches("/author-5/book-moby%20dick/").unwrap();
        assert_eq!(
            args.key,
            Some(Key::new("Author", 5).child("Book", "moby dick"))
        );
        assert!(pattern.matches("/author-5/").is_none());
        assert!(pattern.matches("/author-5/book/").is_none());
    }

    #[test]
    fn test_build_roundtrips_keys() {
        let pattern = compile("/{key}/", &["Author"]);
        let key = Key::new("Author", 5).child("Book", "a/b c");
        let path = pattern.build(Some(&key), None, None).unwrap();
        assert_eq!(pattern.matches(&path).unwrap().key, Some(key));
    }

    #[test]
    fn test_build_requires_matching_arguments() {
        let ancestor = compile("/{ancestor_key}/{kind_lower}/", &["Author"]);
        assert!(ancestor.build(None, None, None).is_none());
        assert!(ancestor.build(None, Some(&Key::new("Shelf", 1)), None).is_none());
        assert_eq!(
            ancestor.build(None, Some(&Key::new("Author", 1)), None),
            Some("/author-1/book/".to_string())
        );

        let paged = compile("/{kind_lower}/page-<int:page>/", &[]);
        assert!(paged.build(None, None, Some(1)).is_none());
        assert_eq!(paged.build(None, None, Some(4)), Some("/book/page-4/".to_string()));
    }

    #[test]
    fn test_key_kinds_must_match() {
        let pattern = compile("/{key}/{action}/", &[]);
        assert!(pattern.build(Some(&Key::new("Author", 1)), None, None).is_none());
        assert_eq!(
            pattern.build(Some(&Key::new("Book", 1)), None, None),
            Some("/book-1/list/".to_string())
        );
    }
}
