use std::collections::{HashMap, HashSet};

use ego_tree::{NodeId, NodeRef};
use scraper::node::{Element, Node};
use scraper::Html;

use crate::format::{escape_attr, escape_text, is_verbatim, is_void, keeps_text_raw, Printer};

/// Changes to apply while serializing a parsed document. The tree itself is
/// never mutated.
#[derive(Debug, Default)]
pub(crate) struct DocumentEdits {
    attrs: HashMap<NodeId, Vec<(String, String)>>,
    removed: HashSet<NodeId>,
    contents: HashMap<NodeId, String>,
}

impl DocumentEdits {
    pub fn set_attr(&mut self, node: NodeId, name: &str, value: impl Into<String>) {
        let value = value.into();
        let overrides = self.attrs.entry(node).or_default();
        match overrides.iter_mut().find(|(existing, _)| existing == name) {
            Some(slot) => slot.1 = value,
            None => overrides.push((name.to_string(), value)),
        }
    }

    /// Drop the element and its whole subtree from the output.
    pub fn remove(&mut self, node: NodeId) {
        self.removed.insert(node);
    }

    pub fn is_removed(&self, node: NodeId) -> bool {
        self.removed.contains(&node)
    }

    /// Replace the text content of an element such as `<style>`.
    pub fn set_contents(&mut self, node: NodeId, text: impl Into<String>) {
        self.contents.insert(node, text.into());
    }

    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }

    fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.attrs
            .get(&node)?
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Serialize `html` with `edits` applied as indented markup.
///
/// Each element starts its own line. Elements holding only text stay on one
/// line, raw-text and preformatted elements are copied as they are, and
/// whitespace-only text disappears.
pub(crate) fn render_pretty(html: &Html, edits: &DocumentEdits) -> String {
    let mut printer = Printer::default();
    for child in html.tree.root().children() {
        pretty_node(child, 0, edits, &mut printer);
    }
    printer.finish()
}

fn pretty_node(node: NodeRef<'_, Node>, depth: usize, edits: &DocumentEdits, printer: &mut Printer) {
    match node.value() {
        Node::Doctype(doctype) => printer.line(depth, &format!("<!DOCTYPE {}>", doctype.name())),
        Node::Comment(comment) => printer.line(depth, &format!("<!--{}-->", &**comment)),
        Node::Text(text) => {
            let mut line = String::new();
            escape_text(text.trim(), &mut line);
            printer.line(depth, &line);
        }
        Node::Element(element) => {
            if edits.is_removed(node.id()) {
                return;
            }
            let name = element.name();
            if is_void(name) {
                printer.line(depth, &open_tag(node.id(), element, edits));
            } else if is_verbatim(name) || has_only_text(node, edits) {
                let mut line = String::new();
                compact_element(node, element, edits, &mut line);
                let line = if is_verbatim(name) {
                    line
                } else {
                    collapse_text(&line)
                };
                printer.line(depth, &line);
            } else {
                printer.line(depth, &open_tag(node.id(), element, edits));
                for child in node.children() {
                    pretty_node(child, depth + 1, edits, printer);
                }
                printer.line(depth, &format!("</{name}>"));
            }
        }
        _ => {
            for child in node.children() {
                pretty_node(child, depth, edits, printer);
            }
        }
    }
}

fn has_only_text(node: NodeRef<'_, Node>, edits: &DocumentEdits) -> bool {
    edits.contents.contains_key(&node.id())
        || node.children().all(|child| matches!(child.value(), Node::Text(_)))
}

/// Trim the text between an inline element's tags.
fn collapse_text(line: &str) -> String {
    let Some(open_end) = line.find('>') else {
        return line.to_string();
    };
    let Some(close_start) = line.rfind("</") else {
        return line.to_string();
    };
    if close_start <= open_end {
        return line.to_string();
    }
    format!(
        "{}{}{}",
        &line[..=open_end],
        line[open_end + 1..close_start].trim(),
        &line[close_start..]
    )
}

/// Plain serialization with edits applied and whitespace left untouched.
fn compact_node(node: NodeRef<'_, Node>, raw_parent: bool, edits: &DocumentEdits, out: &mut String) {
    match node.value() {
        Node::Text(text) => {
            if raw_parent {
                out.push_str(text);
            } else {
                escape_text(text, out);
            }
        }
        Node::Comment(comment) => {
            out.push_str("<!--");
            out.push_str(comment);
            out.push_str("-->");
        }
        Node::Element(element) => {
            if !edits.is_removed(node.id()) {
                compact_element(node, element, edits, out);
            }
        }
        _ => {
            for child in node.children() {
                compact_node(child, raw_parent, edits, out);
            }
        }
    }
}

fn compact_element(node: NodeRef<'_, Node>, element: &Element, edits: &DocumentEdits, out: &mut String) {
    let name = element.name();
    out.push_str(&open_tag(node.id(), element, edits));
    if is_void(name) {
        return;
    }
    let raw = keeps_text_raw(name);
    match edits.contents.get(&node.id()) {
        Some(text) if raw => out.push_str(text),
        Some(text) => escape_text(text, out),
        None => {
            for child in node.children() {
                compact_node(child, raw, edits, out);
            }
        }
    }
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn open_tag(id: NodeId, element: &Element, edits: &DocumentEdits) -> String {
    let mut tag = String::from("<");
    tag.push_str(element.name());
    for (qual, value) in element.attrs.iter() {
        // Foreign content (inline SVG, MathML) keeps prefixes such as `xlink:`.
        let name = match &qual.prefix {
            Some(prefix) => format!("{}:{}", &**prefix, &*qual.local),
            None => qual.local.to_string(),
        };
        let value = edits.attr(id, &name).unwrap_or(&**value);
        tag.push(' ');
        tag.push_str(&name);
        tag.push_str("=\"");
        escape_attr(value, &mut tag);
        tag.push('"');
    }
    tag.push('>');
    tag
}

#[cfg(test)]
mod tests {
    use scraper::Selector;

    use super::*;

    fn first(html: &Html, selector: &str) -> NodeId {
        let selector = Selector::parse(selector).unwrap();
        html.select(&selector).next().unwrap().id()
    }

    #[test]
    fn layout_is_indented_per_depth() {
        let html = Html::parse_document(
            "<!DOCTYPE html><html><head><title>T</title></head><body><div><p>Hi <b>there</b></p><br></div></body></html>",
        );
        let rendered = render_pretty(&html, &DocumentEdits::default());
        let expected = "<!DOCTYPE html>\n<html>\n  <head>\n    <title>T</title>\n  </head>\n  <body>\n    <div>\n      <p>\n        Hi\n        <b>there</b>\n      </p>\n      <br>\n    </div>\n  </body>\n</html>\n";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn edits_rewrite_remove_and_replace() {
        let html = Html::parse_document(
            "<html><head><style>a{}</style><script src=\"https://t.test/a.js\"></script></head><body><img src=\"x.png\" alt=\"a&b\"></body></html>",
        );
        let mut edits = DocumentEdits::default();
        edits.set_attr(first(&html, "img"), "src", "static/images/x.png");
        edits.remove(first(&html, "script"));
        edits.set_contents(first(&html, "style"), "b{color:red}");

        let rendered = render_pretty(&html, &edits);
        assert!(rendered.contains("src=\"static/images/x.png\""));
        assert!(rendered.contains("alt=\"a&amp;b\""));
        assert!(rendered.contains("<style>b{color:red}</style>"));
        assert!(!rendered.contains("t.test"));
    }

    #[test]
    fn scripts_are_copied_verbatim() {
        let html = Html::parse_document(
            "<html><body><script>if (a < b && c) {\n  go();\n}</script></body></html>",
        );
        let rendered = render_pretty(&html, &DocumentEdits::default());
        assert!(rendered.contains("<script>if (a < b && c) {\n  go();\n}</script>"));
    }

    #[test]
    fn svg_attributes_keep_their_namespace_prefix() {
        let html = Html::parse_document(
            "<html><body><svg><use xlink:href=\"#icon\"></use></svg></body></html>",
        );
        let rendered = render_pretty(&html, &DocumentEdits::default());
        assert!(rendered.contains("xlink:href=\"#icon\""), "{rendered}");
    }
}
