//! Human-readable labels for kinds and property names

use indexmap::IndexMap;
use regex::Regex;
use std::sync::OnceLock;

/// Split a CamelCase kind into words: `BlogPost` → `Blog Post`
pub fn split_camel_case(kind: &str) -> String {
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    let regex = BOUNDARY.get_or_init(|| Regex::new(r"([a-z])([A-Z0-9])").unwrap());
    regex.replace_all(kind, "$1 $2").into_owned()
}

/// Title-case a snake_case name: `published_on` → `Published On`
pub fn title_case(name: &str) -> String {
    name.split(['_', '.'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolves display labels for kinds
///
/// Configured labels win; anything else is the CamelCase name split into
/// words.
#[derive(Debug, Clone, Default)]
pub struct LabelService {
    overrides: IndexMap<String, String>,
}

impl LabelService {
    pub fn new(overrides: IndexMap<String, String>) -> Self {
        Self { overrides }
    }

    pub fn label_for_kind(&self, kind: &str) -> String {
        self.overrides
            .get(kind)
            .cloned()
            .unwrap_or_else(|| split_camel_case(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_camel_case() {
        assert_eq!(split_camel_case("BlogPost"), "Blog Post");
        assert_eq!(split_camel_case("Author"), "Author");
        assert_eq!(split_camel_case("Mp3Track"), "Mp 3Track");
        assert_eq!(split_camel_case("URLRule"), "URLRule");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("published_on"), "Published On");
        assert_eq!(title_case("name"), "Name");
        assert_eq!(title_case("address.city"), "Address City");
    }

    #[test]
    fn test_label_overrides() {
        let mut overrides = IndexMap::new();
        overrides.insert("BlogPost".to_string(), "Article".to_string());
        let labels = LabelService::new(overrides);
        assert_eq!(labels.label_for_kind("BlogPost"), "Article");
        assert_eq!(labels.label_for_kind("ShelfItem"), "Shelf Item");
    }
}
