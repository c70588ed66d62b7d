//! The `<analysis>` markup fragment embedded in free-text replies.
//!
//! A tagged reply is prose with one `<analysis>…</analysis>` fragment
//! somewhere inside it. [`parse_analysis`] cuts the fragment out by its tag
//! boundaries and parses it with `quick-xml` into a small [`XmlNode`] tree.
//! Field lookups are plain slash-separated paths relative to the
//! `<analysis>` element:
//!
//! ```rust
//! use lexintake::pipeline::markup::parse_analysis;
//!
//! let reply = "Sure!\n<analysis><party_a><name>Ali</name></party_a></analysis>\nThanks.";
//! let root = parse_analysis(reply).unwrap();
//! assert_eq!(root.text_at("party_a/name"), Some("Ali"));
//! assert_eq!(root.text_at("party_b/name"), None);
//! ```

use crate::error::PipelineError;
use crate::pipeline::checkbox::split_list;
use once_cell::sync::Lazy;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::{Captures, Regex};
use std::borrow::Cow;

/// Opening tag of the fragment.
pub const ANALYSIS_OPEN: &str = "<analysis>";
/// Closing tag of the fragment.
pub const ANALYSIS_CLOSE: &str = "</analysis>";

/// `&` that does not start an entity or character reference.
static RE_AMPERSAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#x[0-9a-fA-F]+;|#[0-9]+;|[A-Za-z][A-Za-z0-9]*;)?").unwrap());

/// One element of the parsed fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    text: String,
}

impl XmlNode {
    fn open(start: &BytesStart<'_>) -> Self {
        let attrs = start
            .attributes()
            .flatten()
            .map(|a| {
                (
                    String::from_utf8_lossy(a.key.as_ref()).into_owned(),
                    String::from_utf8_lossy(&a.value).into_owned(),
                )
            })
            .collect();
        Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attrs,
            children: Vec::new(),
            text: String::new(),
        }
    }

    /// Direct text content, trimmed.
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First direct child called `name`.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All direct children called `name`, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Follow a slash-separated path of child names.
    pub fn find(&self, path: &str) -> Option<&XmlNode> {
        path.split('/')
            .filter(|seg| !seg.is_empty())
            .try_fold(self, |node, seg| node.child(seg))
    }

    /// Trimmed text at `path`, or `None` when the element is missing or blank.
    pub fn text_at(&self, path: &str) -> Option<&str> {
        self.find(path).map(XmlNode::text).filter(|t| !t.is_empty())
    }

    /// List at `path`: `<item>` children when present, otherwise the
    /// element's text split on commas. Missing element → empty list.
    pub fn list_at(&self, path: &str) -> Vec<String> {
        let Some(node) = self.find(path) else {
            return Vec::new();
        };
        if node.child("item").is_some() {
            node.children_named("item")
                .map(XmlNode::text)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            split_list(node.text())
        }
    }
}

/// Cut the `<analysis>` fragment (tags included) out of a reply.
pub fn locate_fragment(reply: &str) -> Option<&str> {
    let start = reply.find(ANALYSIS_OPEN)?;
    let close = reply[start..].find(ANALYSIS_CLOSE)?;
    Some(&reply[start..start + close + ANALYSIS_CLOSE.len()])
}

/// Locate and parse the fragment. Every failure is a parse error carrying
/// the full reply.
pub fn parse_analysis(reply: &str) -> Result<XmlNode, PipelineError> {
    let parse_error = |detail: String| PipelineError::Parse {
        detail,
        raw: Some(reply.to_string()),
    };

    if !reply.contains(ANALYSIS_OPEN) {
        return Err(parse_error(format!("reply has no {ANALYSIS_OPEN} tag")));
    }
    let fragment = locate_fragment(reply)
        .ok_or_else(|| parse_error(format!("reply has no {ANALYSIS_CLOSE} tag")))?;

    parse_tree(fragment).map_err(parse_error)
}

fn escape_bare_ampersands(text: &str) -> Cow<'_, str> {
    RE_AMPERSAND.replace_all(text, |caps: &Captures<'_>| match caps.get(1) {
        Some(reference) => format!("&{}", reference.as_str()),
        None => "&amp;".to_string(),
    })
}

fn resolve_reference(name: &str) -> String {
    let resolved = match name.strip_prefix('#') {
        Some(num) => {
            let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => num.parse().ok(),
            };
            code.and_then(char::from_u32).map(String::from)
        }
        None => resolve_predefined_entity(name).map(str::to_string),
    };
    resolved.unwrap_or_else(|| format!("&{name};"))
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

fn parse_tree(fragment: &str) -> Result<XmlNode, String> {
    let source = escape_bare_ampersands(fragment);
    let mut reader = Reader::from_str(&source);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("malformed markup near byte {}: {e}", reader.buffer_position()))?;
        match event {
            Event::Start(start) => stack.push(XmlNode::open(&start)),
            Event::Empty(start) => {
                let node = XmlNode::open(&start);
                attach(&mut stack, &mut root, node);
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| "closing tag without an opening tag".to_string())?;
                attach(&mut stack, &mut root, node);
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&text));
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::GeneralRef(reference) => {
                if let Some(top) = stack.last_mut() {
                    let name = String::from_utf8_lossy(&reference);
                    top.text.push_str(&resolve_reference(&name));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(format!("unclosed <{}> element", open.name));
    }
    root.ok_or_else(|| "empty markup fragment".to_string())
}
