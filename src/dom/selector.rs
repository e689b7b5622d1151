use std::fmt;

/// Read-only view of one element, enough to evaluate a [`Selector`].
pub trait ElementView {
    fn tag(&self) -> &str;
    fn attr(&self, name: &str) -> Option<&str>;
}

/// A selector list of simple compound selectors: optional tag, classes and attribute tests.
///
/// Platforms only ever need this subset, and keeping it typed means profiles cannot carry a
/// malformed selector string. [`Display`](fmt::Display) renders standard CSS for real DOM
/// bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    alternatives: Vec<Compound>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Compound {
    tag: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrTest>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrTest {
    name: String,
    value: Option<String>,
}

impl Selector {
    fn single(compound: Compound) -> Self {
        Self {
            alternatives: vec![compound],
        }
    }

    pub fn tag(name: &str) -> Self {
        Self::single(Compound {
            tag: Some(name.to_ascii_lowercase()),
            ..Compound::default()
        })
    }

    pub fn class(name: &str) -> Self {
        Self::single(Compound {
            classes: vec![name.to_string()],
            ..Compound::default()
        })
    }

    /// `[name]`
    pub fn attr(name: &str) -> Self {
        Self::single(Compound {
            attrs: vec![AttrTest {
                name: name.to_string(),
                value: None,
            }],
            ..Compound::default()
        })
    }

    /// `[name="value"]`
    pub fn attr_eq(name: &str, value: &str) -> Self {
        Self::single(Compound {
            attrs: vec![AttrTest {
                name: name.to_string(),
                value: Some(value.to_string()),
            }],
            ..Compound::default()
        })
    }

    /// Restrict the last alternative to elements with tag `name`.
    pub fn with_tag(mut self, name: &str) -> Self {
        if let Some(last) = self.alternatives.last_mut() {
            last.tag = Some(name.to_ascii_lowercase());
        }
        self
    }

    /// Selector list: matches when any alternative matches.
    pub fn or(mut self, other: Selector) -> Self {
        self.alternatives.extend(other.alternatives);
        self
    }

    pub fn matches(&self, el: &impl ElementView) -> bool {
        self.alternatives.iter().any(|c| c.matches(el))
    }
}

impl Compound {
    fn matches(&self, el: &impl ElementView) -> bool {
        if let Some(tag) = &self.tag
            && !el.tag().eq_ignore_ascii_case(tag)
        {
            return false;
        }
        if !self.classes.is_empty() {
            let class_attr = el.attr("class").unwrap_or("");
            if !self
                .classes
                .iter()
                .all(|c| class_attr.split_whitespace().any(|have| have == c))
            {
                return false;
            }
        }
        self.attrs.iter().all(|test| match (&test.value, el.attr(&test.name)) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(want), Some(have)) => want == have,
        })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, compound) in self.alternatives.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if let Some(tag) = &compound.tag {
                f.write_str(tag)?;
            }
            for class in &compound.classes {
                write!(f, ".{class}")?;
            }
            for attr in &compound.attrs {
                match &attr.value {
                    Some(v) => write!(f, "[{}=\"{}\"]", attr.name, v)?,
                    None => write!(f, "[{}]", attr.name)?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct El {
        tag: &'static str,
        attrs: BTreeMap<&'static str, &'static str>,
    }

    impl ElementView for El {
        fn tag(&self) -> &str {
            self.tag
        }
        fn attr(&self, name: &str) -> Option<&str> {
            self.attrs.get(name).copied()
        }
    }

    fn el(tag: &'static str, attrs: &[(&'static str, &'static str)]) -> El {
        El {
            tag,
            attrs: attrs.iter().copied().collect(),
        }
    }

    #[test]
    fn renders_css() {
        let sel = Selector::attr("data-test-render-count").with_tag("div");
        assert_eq!(sel.to_string(), "div[data-test-render-count]");

        let list = Selector::tag("user-query").or(Selector::tag("model-response"));
        assert_eq!(list.to_string(), "user-query, model-response");

        let eq = Selector::attr_eq("data-testid", "user-message");
        assert_eq!(eq.to_string(), "[data-testid=\"user-message\"]");
    }

    #[test]
    fn matches_tag_case_insensitively() {
        let sel = Selector::tag("user-query");
        assert!(sel.matches(&el("USER-QUERY", &[])));
        assert!(!sel.matches(&el("model-response", &[])));
    }

    #[test]
    fn matches_whole_class_tokens_only() {
        let sel = Selector::class("markdown");
        assert!(sel.matches(&el("div", &[("class", "prose markdown")])));
        assert!(!sel.matches(&el("div", &[("class", "markdown-body")])));
        assert!(!sel.matches(&el("div", &[])));
    }

    #[test]
    fn attribute_presence_and_value() {
        let present = Selector::attr("data-message-author-role");
        assert!(present.matches(&el("div", &[("data-message-author-role", "user")])));

        let exact = Selector::attr_eq("data-testid", "user-message");
        assert!(exact.matches(&el("div", &[("data-testid", "user-message")])));
        assert!(!exact.matches(&el("div", &[("data-testid", "other")])));
    }

    #[test]
    fn tag_restriction_applies_to_compound() {
        let sel = Selector::attr("data-test-render-count").with_tag("div");
        assert!(sel.matches(&el("div", &[("data-test-render-count", "2")])));
        assert!(!sel.matches(&el("span", &[("data-test-render-count", "2")])));
    }
}
