//! HTML string builder for archive pages
//!
//! A small escaping-aware builder in the spirit of the scripts that wrote
//! the first archive pages: elements collect attributes and children, and
//! [`page`] wraps fragments in the shared document shell. Nothing here
//! parses HTML; markup captured from the live site goes through
//! [`Html::raw`] untouched.

/// An HTML fragment that is already safe to embed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Html(String);

impl Html {
    /// Wraps a string that is already valid HTML
    pub fn raw(html: impl Into<String>) -> Self {
        Self(html.into())
    }

    /// Escapes plain text into a fragment, rendering newlines as `<br>`
    pub fn text(text: &str) -> Self {
        Self(escape(
            text,
            EscapeOptions {
                use_br: true,
                use_nbsp: false,
            },
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Html {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options for [`escape`]
#[derive(Debug, Clone, Copy, Default)]
pub struct EscapeOptions {
    /// Render line breaks as `<br>` instead of the `&#010;` entity
    /// (entities survive attribute values, `<br>` is for content)
    pub use_br: bool,
    /// Render spaces as `&nbsp;` to preserve runs of whitespace
    pub use_nbsp: bool,
}

/// Escapes text for embedding in HTML content or attribute values
///
/// `\r\n` collapses to a single break; a lone `\r` passes through.
pub fn escape(text: &str, options: EscapeOptions) -> String {
    let line_break = if options.use_br { "<br>" } else { "&#010;" };
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            ' ' if options.use_nbsp => out.push_str("&nbsp;"),
            '\n' => out.push_str(line_break),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                    out.push_str(line_break);
                } else {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

enum AttrValue {
    /// Boolean attribute rendered without a value
    Flag,
    Value(String),
}

/// Builds one element: attributes, then children, then [`Element::build`]
pub struct Element {
    tag: &'static str,
    attributes: Vec<(String, AttrValue)>,
    children: String,
    self_closing: bool,
}

impl Element {
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            attributes: Vec::new(),
            children: String::new(),
            self_closing: false,
        }
    }

    /// Creates an element rendered as `<tag ... />` with no children
    pub fn self_closing(tag: &'static str) -> Self {
        Self {
            self_closing: true,
            ..Self::new(tag)
        }
    }

    /// Adds an attribute; an empty value still renders as `name=""`
    pub fn attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.push((name.to_string(), AttrValue::Value(value.into())));
        self
    }

    /// Adds an attribute only when a value is present
    pub fn maybe_attr(self, name: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.attr(name, value),
            None => self,
        }
    }

    /// Adds a boolean attribute rendered without a value
    pub fn flag(mut self, name: &str) -> Self {
        self.attributes.push((name.to_string(), AttrValue::Flag));
        self
    }

    /// Adds a `style` attribute from property/value pairs
    pub fn style(self, properties: &[(&str, &str)]) -> Self {
        let css = properties
            .iter()
            .map(|(property, value)| format!("{}:{}", property, value))
            .collect::<Vec<_>>()
            .join(";");
        self.attr("style", css)
    }

    /// Adds an escaped text child
    pub fn text(mut self, text: &str) -> Self {
        self.children.push_str(Html::text(text).as_str());
        self
    }

    /// Adds an already-built child fragment
    pub fn child(mut self, child: Html) -> Self {
        self.children.push_str(child.as_str());
        self
    }

    /// Adds every fragment from an iterator as children
    pub fn children(mut self, children: impl IntoIterator<Item = Html>) -> Self {
        for child in children {
            self.children.push_str(child.as_str());
        }
        self
    }

    /// Renders the element to a fragment
    pub fn build(self) -> Html {
        let mut out = String::new();
        out.push('<');
        out.push_str(self.tag);
        for (name, value) in &self.attributes {
            out.push(' ');
            out.push_str(name);
            if let AttrValue::Value(value) = value {
                out.push_str("=\"");
                out.push_str(&escape(value, EscapeOptions::default()));
                out.push('"');
            }
        }
        if self.self_closing {
            out.push_str(" />");
        } else {
            out.push('>');
            out.push_str(&self.children);
            out.push_str("</");
            out.push_str(self.tag);
            out.push('>');
        }
        Html(out)
    }
}

/// Wraps fragments in the document shell every archive page shares:
/// viewport meta, pre-wrap body text, dark mode support
pub fn page(children: impl IntoIterator<Item = Html>) -> String {
    let body: String = children.into_iter().map(|child| child.0).collect();
    format!(
        "<!DOCTYPE html>\
         <html>\
         <head>\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\" />\
         <style>\
         body {{ white-space: pre-wrap; }} \
         @media (prefers-color-scheme: dark) {{ :root {{ color-scheme: dark; }} }}\
         </style>\
         </head>\
         <body>{}</body>\
         </html>",
        body
    )
}

/// Routes an external URL through the school's outbound-link redirector
/// (`/link?path=...`), the way the live site rewrites off-site references
pub fn external_link(url: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("path", url)
        .finish();
    format!("/link?{}", query)
}

// Shorthand constructors for the tags archive pages use

pub fn div() -> Element {
    Element::new("div")
}
pub fn p() -> Element {
    Element::new("p")
}
pub fn a() -> Element {
    Element::new("a")
}
pub fn ul() -> Element {
    Element::new("ul")
}
pub fn li() -> Element {
    Element::new("li")
}
pub fn h1() -> Element {
    Element::new("h1")
}
pub fn h2() -> Element {
    Element::new("h2")
}
pub fn span() -> Element {
    Element::new("span")
}
pub fn strong() -> Element {
    Element::new("strong")
}
pub fn em() -> Element {
    Element::new("em")
}
pub fn table() -> Element {
    Element::new("table")
}
pub fn tr() -> Element {
    Element::new("tr")
}
pub fn th() -> Element {
    Element::new("th")
}
pub fn td() -> Element {
    Element::new("td")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_replaces_markup_characters() {
        assert_eq!(
            escape("<b> & \"q\"", EscapeOptions::default()),
            "&lt;b&gt; &amp; &quot;q&quot;"
        );
    }

    #[test]
    fn test_escape_newline_defaults_to_entity() {
        assert_eq!(escape("a\nb", EscapeOptions::default()), "a&#010;b");
    }

    #[test]
    fn test_escape_newline_as_br_for_content() {
        let options = EscapeOptions {
            use_br: true,
            use_nbsp: false,
        };
        assert_eq!(escape("a\nb", options), "a<br>b");
        assert_eq!(escape("a\r\nb", options), "a<br>b", "CRLF is one break");
    }

    #[test]
    fn test_escape_keeps_lone_carriage_return() {
        assert_eq!(escape("a\rb", EscapeOptions::default()), "a\rb");
    }

    #[test]
    fn test_escape_nbsp_option() {
        let options = EscapeOptions {
            use_br: false,
            use_nbsp: true,
        };
        assert_eq!(escape("a b", options), "a&nbsp;b");
    }

    #[test]
    fn test_element_renders_tag_attributes_children() {
        let html = a().attr("href", "/x").text("hi").build();
        assert_eq!(html.as_str(), "<a href=\"/x\">hi</a>");
    }

    #[test]
    fn test_attribute_values_are_escaped() {
        let html = div().attr("title", "a\"b<c>").build();
        assert_eq!(html.as_str(), "<div title=\"a&quot;b&lt;c&gt;\"></div>");
    }

    #[test]
    fn test_empty_attribute_still_renders() {
        let html = div().attr("data-empty", "").build();
        assert_eq!(html.as_str(), "<div data-empty=\"\"></div>");
    }

    #[test]
    fn test_maybe_attr_drops_missing_values() {
        let html = a()
            .maybe_attr("href", Some("/x"))
            .maybe_attr("target", None::<String>)
            .build();
        assert_eq!(html.as_str(), "<a href=\"/x\"></a>");
    }

    #[test]
    fn test_flag_renders_bare() {
        let html = Element::new("details").flag("open").build();
        assert_eq!(html.as_str(), "<details open></details>");
    }

    #[test]
    fn test_style_joins_properties() {
        let html = span()
            .style(&[("width", "1em"), ("height", "1em")])
            .build();
        assert_eq!(html.as_str(), "<span style=\"width:1em;height:1em\"></span>");
    }

    #[test]
    fn test_nested_elements_compose() {
        let html = ul()
            .child(li().text("one").build())
            .child(li().text("two").build())
            .build();
        assert_eq!(html.as_str(), "<ul><li>one</li><li>two</li></ul>");
    }

    #[test]
    fn test_children_from_iterator() {
        let items = vec![Html::raw("<li>a</li>"), Html::raw("<li>b</li>")];
        let html = ul().children(items).build();
        assert_eq!(html.as_str(), "<ul><li>a</li><li>b</li></ul>");
    }

    #[test]
    fn test_text_child_escapes_and_breaks() {
        let html = p().text("1 < 2\nsure").build();
        assert_eq!(html.as_str(), "<p>1 &lt; 2<br>sure</p>");
    }

    #[test]
    fn test_self_closing_element() {
        let html = Element::self_closing("img").attr("src", "/pic.png").build();
        assert_eq!(html.as_str(), "<img src=\"/pic.png\" />");
    }

    #[test]
    fn test_page_wraps_children_in_shell() {
        let rendered = page([h1().text("Archive").build()]);

        assert!(rendered.starts_with("<!DOCTYPE html>"));
        assert!(rendered.contains("<body><h1>Archive</h1></body>"));
        assert!(rendered.contains("white-space: pre-wrap"));
        assert!(rendered.contains("prefers-color-scheme: dark"));
    }

    #[test]
    fn test_external_link_routes_through_redirector() {
        assert_eq!(
            external_link("https://example.com/a b?c=d&e"),
            "/link?path=https%3A%2F%2Fexample.com%2Fa+b%3Fc%3Dd%26e"
        );
    }
}
