//! Low-level HTML output helpers: escaping, element classes and an indenting
//! line printer.

const INDENT: &str = "  ";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "keygen", "link", "meta",
    "param", "source", "track", "wbr",
];

/// Elements whose text children are written without escaping.
const UNESCAPED_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "plaintext", "noscript",
];

/// Elements copied verbatim by the pretty printer.
const VERBATIM_ELEMENTS: &[&str] = &["script", "style", "pre", "textarea", "noscript"];

pub(crate) fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

pub(crate) fn keeps_text_raw(name: &str) -> bool {
    UNESCAPED_TEXT_ELEMENTS.contains(&name)
}

pub(crate) fn is_verbatim(name: &str) -> bool {
    VERBATIM_ELEMENTS.contains(&name)
}

pub(crate) fn escape_text(input: &str, out: &mut String) {
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

pub(crate) fn escape_attr(input: &str, out: &mut String) {
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

/// Collects output one line at a time, indented two spaces per depth.
#[derive(Debug, Default)]
pub(crate) struct Printer {
    out: String,
}

impl Printer {
    pub fn line(&mut self, depth: usize, content: &str) {
        if content.trim().is_empty() {
            return;
        }
        for _ in 0..depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(content);
        self.out.push('\n');
    }

    pub fn finish(self) -> String {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_attributes_escape_differently() {
        let mut text = String::new();
        escape_text("a < b & \"c\"", &mut text);
        assert_eq!(text, "a &lt; b &amp; \"c\"");

        let mut attr = String::new();
        escape_attr("x\"y&z<", &mut attr);
        assert_eq!(attr, "x&quot;y&amp;z<");
    }

    #[test]
    fn blank_lines_are_dropped() {
        let mut printer = Printer::default();
        printer.line(0, "<div>");
        printer.line(1, "   ");
        printer.line(1, "<p>x</p>");
        printer.line(0, "</div>");
        assert_eq!(printer.finish(), "<div>\n  <p>x</p>\n</div>\n");
    }
}
