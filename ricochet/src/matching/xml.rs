//! XML canonicalization and the element-path subset used by the
//! `xmlPath`/`xpath` matchers.
//!
//! Canonical form: attributes sorted by name, whitespace-only text dropped,
//! surrounding whitespace trimmed, self-closing tags expanded, comments and
//! processing instructions ignored. Two documents are equal iff their
//! canonical forms are byte-equal.
//!
//! The path language is a practical subset of XPath: `/a/b` (rooted),
//! `//b` (any depth), positional predicates `[n]` (1-based), and a
//! terminal `text()` step. Matched elements yield their text content.

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;

/// Render XML into its canonical textual form.
pub fn canonicalize(input: &str) -> Result<String, String> {
    let mut reader = Reader::from_str(input);
    let mut out = String::new();
    let mut depth = 0usize;
    let mut seen_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                seen_root = true;
                depth += 1;
                write_open_tag(&mut out, &e)?;
            }
            Ok(Event::Empty(e)) => {
                seen_root = true;
                write_open_tag(&mut out, &e)?;
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                out.push_str(&format!("</{name}>"));
            }
            Ok(Event::End(e)) => {
                depth = depth.saturating_sub(1);
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                out.push_str(&format!("</{name}>"));
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    out.push_str(&escape(trimmed));
                }
            }
            Ok(Event::CData(c)) => {
                let text = String::from_utf8_lossy(&c).into_owned();
                if !text.trim().is_empty() {
                    out.push_str(&escape(text.trim()));
                }
            }
            Ok(Event::Decl(_)) | Ok(Event::Comment(_)) | Ok(Event::PI(_)) | Ok(Event::DocType(_)) => {}
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
        }
    }

    if !seen_root {
        return Err("document has no root element".to_string());
    }
    if depth != 0 {
        return Err("unbalanced elements".to_string());
    }
    Ok(out)
}

fn write_open_tag(out: &mut String, e: &quick_xml::events::BytesStart<'_>) -> Result<(), String> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attrs: Vec<(String, String)> = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        attrs.push((key, value));
    }
    attrs.sort();

    out.push('<');
    out.push_str(&name);
    for (key, value) in attrs {
        out.push_str(&format!(" {key}=\"{}\"", escape(&value)));
    }
    out.push('>');
    Ok(())
}

/// One parsed element tree node.
#[derive(Debug, Clone)]
struct XmlNode {
    name: String,
    children: Vec<XmlNode>,
    text: String,
}

impl XmlNode {
    /// Concatenated text of this node and all descendants.
    fn text_content(&self) -> String {
        let mut content = self.text.clone();
        for child in &self.children {
            content.push_str(&child.text_content());
        }
        content
    }

    fn descendants(&self) -> Vec<&XmlNode> {
        let mut nodes = vec![self];
        for child in &self.children {
            nodes.extend(child.descendants());
        }
        nodes
    }
}

fn parse_tree(input: &str) -> Result<XmlNode, String> {
    let mut reader = Reader::from_str(input);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push(XmlNode {
                    name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    children: Vec::new(),
                    text: String::new(),
                });
            }
            Ok(Event::Empty(e)) => {
                let node = XmlNode {
                    name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    children: Vec::new(),
                    text: String::new(),
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None if root.is_none() => root = Some(node),
                    None => return Err("multiple root elements".to_string()),
                }
            }
            Ok(Event::End(_)) => {
                let node = stack.pop().ok_or("unbalanced end tag")?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None if root.is_none() => root = Some(node),
                    None => return Err("multiple root elements".to_string()),
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(t.unescape().map_err(|e| e.to_string())?.trim());
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(String::from_utf8_lossy(&c).trim());
                }
            }
            Ok(Event::Decl(_)) | Ok(Event::Comment(_)) | Ok(Event::PI(_)) | Ok(Event::DocType(_)) => {}
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
        }
    }

    if !stack.is_empty() {
        return Err("unbalanced elements".to_string());
    }
    root.ok_or_else(|| "document has no root element".to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    name: String,
    /// 1-based positional predicate.
    index: Option<usize>,
}

/// A compiled element-path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlPathExpr {
    /// `//`-rooted: the first step may match at any depth.
    anywhere: bool,
    steps: Vec<Step>,
}

impl XmlPathExpr {
    pub fn parse(path: &str) -> Result<Self, String> {
        let (anywhere, rest) = if let Some(rest) = path.strip_prefix("//") {
            (true, rest)
        } else if let Some(rest) = path.strip_prefix('/') {
            (false, rest)
        } else {
            return Err("path must start with / or //".to_string());
        };

        let mut steps = Vec::new();
        for raw in rest.split('/') {
            if raw.is_empty() {
                return Err("empty path step".to_string());
            }
            if raw == "text()" {
                // Terminal text() changes nothing structurally; matched
                // elements always yield their text content.
                continue;
            }
            let (name, index) = match raw.split_once('[') {
                Some((name, predicate)) => {
                    let digits = predicate.strip_suffix(']').ok_or("unterminated predicate")?;
                    let n: usize = digits.parse().map_err(|_| format!("bad predicate {digits:?}"))?;
                    if n == 0 {
                        return Err("positional predicates are 1-based".to_string());
                    }
                    (name.to_string(), Some(n))
                }
                None => (raw.to_string(), None),
            };
            if name.is_empty() {
                return Err("empty element name".to_string());
            }
            steps.push(Step { name, index });
        }

        if steps.is_empty() {
            return Err("path selects nothing".to_string());
        }
        Ok(XmlPathExpr { anywhere, steps })
    }

    /// Evaluate over an XML document, yielding the text content of every
    /// matched element.
    pub fn evaluate(&self, subject: &str) -> Result<Vec<String>, String> {
        let root = parse_tree(subject)?;

        let first = &self.steps[0];
        let mut current: Vec<&XmlNode> = if self.anywhere {
            root.descendants()
                .into_iter()
                .filter(|n| n.name == first.name)
                .collect()
        } else if root.name == first.name {
            vec![&root]
        } else {
            Vec::new()
        };
        if let Some(n) = first.index {
            current = current.into_iter().nth(n - 1).into_iter().collect();
        }

        for step in &self.steps[1..] {
            let mut next: Vec<&XmlNode> = Vec::new();
            for node in current {
                let named: Vec<&XmlNode> = node.children.iter().filter(|c| c.name == step.name).collect();
                match step.index {
                    Some(n) => next.extend(named.into_iter().nth(n - 1)),
                    None => next.extend(named),
                }
            }
            current = next;
        }

        Ok(current.into_iter().map(|n| n.text_content()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_sorts_attributes_and_expands_self_closing() {
        let a = canonicalize("<r b=\"2\" a=\"1\"><x/></r>").unwrap();
        let b = canonicalize("<r a=\"1\" b=\"2\">\n  <x></x>\n</r>").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "<r a=\"1\" b=\"2\"><x></x></r>");
    }

    #[test]
    fn canonicalize_rejects_broken_documents() {
        assert!(canonicalize("<unclosed").is_err());
        assert!(canonicalize("").is_err());
    }

    #[test]
    fn rooted_path_walks_children() {
        let expr = XmlPathExpr::parse("/order/item/text()").unwrap();
        let found = expr
            .evaluate("<order><item>widget</item><item>gadget</item></order>")
            .unwrap();
        assert_eq!(found, vec!["widget", "gadget"]);
    }

    #[test]
    fn anywhere_path_matches_at_any_depth() {
        let expr = XmlPathExpr::parse("//sku").unwrap();
        let found = expr
            .evaluate("<a><b><sku>1</sku></b><sku>2</sku></a>")
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn positional_predicates_are_one_based() {
        let expr = XmlPathExpr::parse("/order/item[2]").unwrap();
        let found = expr
            .evaluate("<order><item>widget</item><item>gadget</item></order>")
            .unwrap();
        assert_eq!(found, vec!["gadget"]);
        assert!(XmlPathExpr::parse("/order/item[0]").is_err());
    }

    #[test]
    fn unmatched_path_yields_empty_set() {
        let expr = XmlPathExpr::parse("/order/missing").unwrap();
        assert!(expr.evaluate("<order><item>x</item></order>").unwrap().is_empty());
    }
}
