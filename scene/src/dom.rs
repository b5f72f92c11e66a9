use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::source::Source;

/// Owned, mutable element tree.
///
/// The underlying XML parser is read-only, but the version upgrader and the
/// parameter substitution pass both rewrite the document, so the parsed DOM
/// is converted into this tree once per source. Attributes keep document
/// order; comments and processing instructions are dropped during
/// conversion. Every element remembers the byte offset of its start tag for
/// diagnostics.
#[derive(Debug, Clone)]
pub(crate) struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub offset: usize,
}

impl Element {
    pub fn new(name: impl Into<String>, offset: usize) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
            offset,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Replaces an existing attribute or appends a new one.
    pub fn set_attribute(&mut self, name: &str, value: &str) {
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.attrs.push((name.to_string(), value.to_string())),
        }
    }

    /// Inserts an attribute in front of all existing ones.
    pub fn prepend_attribute(&mut self, name: &str, value: &str) {
        self.attrs.retain(|(k, _)| k != name);
        self.attrs.insert(0, (name.to_string(), value.to_string()));
    }

    pub fn remove_attribute(&mut self, name: &str) {
        self.attrs.retain(|(k, _)| k != name);
    }

    /// Serializes the tree, 4-space indented, with an XML declaration.
    pub fn to_xml_string(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        self.write_into(&mut out, 0);
        out
    }

    fn write_into(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("    ");
        }
        let _ = write!(out, "<{}", self.name);
        for (k, v) in &self.attrs {
            let _ = write!(out, " {}=\"{}\"", k, escape(v));
        }
        if self.children.is_empty() {
            out.push_str("/>\n");
        } else {
            out.push_str(">\n");
            for child in &self.children {
                child.write_into(out, depth + 1);
            }
            for _ in 0..depth {
                out.push_str("    ");
            }
            let _ = writeln!(out, "</{}>", self.name);
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// Parses a source document and converts its root element.
pub(crate) fn parse_document(src: &Source) -> Result<Element> {
    let doc = roxmltree::Document::parse(src.text()).map_err(|e| Error::Parse {
        src: src.id.clone(),
        loc: format!("line {}, col {}", e.pos().row, e.pos().col),
        msg: e.to_string(),
    })?;
    convert(doc.root_element(), src)
}

fn convert(node: roxmltree::Node, src: &Source) -> Result<Element> {
    let mut element = Element::new(node.tag_name().name(), node.range().start);
    for attr in node.attributes() {
        element
            .attrs
            .push((attr.name().to_string(), attr.value().to_string()));
    }
    for child in node.children() {
        match child.node_type() {
            roxmltree::NodeType::Element => element.children.push(convert(child, src)?),
            roxmltree::NodeType::Comment | roxmltree::NodeType::PI => {}
            roxmltree::NodeType::Text => {
                let text = child.text().unwrap_or_default();
                if !text.trim().is_empty() {
                    return Err(Error::Parse {
                        src: src.id.clone(),
                        loc: src.offset(child.range().start),
                        msg: "unexpected content".into(),
                    });
                }
            }
            roxmltree::NodeType::Root => {}
        }
    }
    Ok(element)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Element {
        parse_document(&Source::new("<string>", text)).unwrap()
    }

    #[test]
    fn keeps_attribute_order_and_offsets() {
        let root = parse("<scene version=\"2.0.0\" type=\"scene\">\n    <integrator type=\"path\"/>\n</scene>");
        assert_eq!(root.name, "scene");
        assert_eq!(root.attrs[0].0, "version");
        assert_eq!(root.attrs[1].0, "type");
        assert_eq!(root.children.len(), 1);
        assert!(root.children[0].offset > 0);
    }

    #[test]
    fn comments_are_dropped_and_text_is_rejected() {
        let root = parse("<scene><!-- note --><shape/></scene>");
        assert_eq!(root.children.len(), 1);

        let err = parse_document(&Source::new("<string>", "<scene>stray</scene>")).unwrap_err();
        assert!(err.to_string().contains("unexpected content"));
    }

    #[test]
    fn serializes_with_indentation_and_escaping() {
        let mut root = Element::new("scene", 0);
        root.set_attribute("version", "2.0.0");
        let mut child = Element::new("string", 0);
        child.set_attribute("name", "title");
        child.set_attribute("value", "a \"b\" & <c>");
        root.children.push(child);

        let text = root.to_xml_string();
        assert!(text.starts_with("<?xml"));
        assert!(text.contains("    <string name=\"title\" value=\"a &quot;b&quot; &amp; &lt;c&gt;\"/>"));
        assert!(text.contains("</scene>"));

        // The output must parse back to the same tree.
        let reparsed = parse(&text);
        assert_eq!(reparsed.children[0].attribute("value"), Some("a \"b\" & <c>"));
    }

    #[test]
    fn prepend_attribute_goes_first() {
        let mut el = Element::new("scene", 0);
        el.set_attribute("type", "scene");
        el.prepend_attribute("version", "2.0.0");
        assert_eq!(el.attrs[0].0, "version");
    }
}
