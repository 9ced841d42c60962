//! Parsed document tree
//!
//! The mapping engine works on an already-parsed element tree. [`XmlNode::parse`] builds
//! one from workbook XML with `quick-xml`; callers that own their own parser can build
//! nodes directly.

use super::ImportError;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One element of a parsed document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct XmlNode {
    /// Element name
    pub name: String,
    /// Attributes with unescaped values
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Child elements in document order
    #[serde(default)]
    pub children: Vec<XmlNode>,
    /// Concatenated, unescaped text content
    #[serde(default)]
    pub text: String,
}

impl XmlNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Builder: set an attribute
    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    /// Builder: append a child element
    pub fn with_child(mut self, child: XmlNode) -> Self {
        self.children.push(child);
        self
    }

    /// Builder: set the text content
    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Trimmed text content
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    /// First direct child with the given element name
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Direct children with the given element name
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// All descendants in document (pre-)order, excluding `self`
    pub fn descendants(&self) -> Vec<&XmlNode> {
        let mut out = Vec::new();
        collect_descendants(self, &mut out);
        out
    }

    /// Descendants with the given element name, in document order
    pub fn descendants_named(&self, name: &str) -> Vec<&XmlNode> {
        self.descendants()
            .into_iter()
            .filter(|n| n.name == name)
            .collect()
    }

    /// Parse an XML document into its root element.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bi_migration_sdk::import::tree::XmlNode;
    ///
    /// let root = XmlNode::parse("<datasource name='ds'><connection class='excel-direct'/></datasource>").unwrap();
    /// assert_eq!(root.attr("name"), Some("ds"));
    /// assert_eq!(root.child("connection").and_then(|c| c.attr("class")), Some("excel-direct"));
    /// ```
    pub fn parse(xml: &str) -> Result<XmlNode, ImportError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => stack.push(node_from_start(&e)?),
                Ok(Event::Empty(e)) => {
                    let node = node_from_start(&e)?;
                    attach(&mut stack, &mut root, node);
                }
                Ok(Event::End(_)) => {
                    let node = stack.pop().ok_or_else(|| {
                        ImportError::ParseError("Unbalanced closing tag".to_string())
                    })?;
                    attach(&mut stack, &mut root, node);
                }
                Ok(Event::Text(t)) => {
                    if let Some(top) = stack.last_mut() {
                        let text = t
                            .unescape()
                            .map_err(|e| ImportError::ParseError(format!("Bad text: {}", e)))?;
                        top.text.push_str(&text);
                    }
                }
                Ok(Event::CData(c)) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(ImportError::ParseError(format!(
                        "XML parsing error at position {}: {}",
                        reader.buffer_position(),
                        e
                    )));
                }
            }
        }

        if !stack.is_empty() {
            return Err(ImportError::ParseError(format!(
                "Unclosed element '{}'",
                stack.last().map(|n| n.name.as_str()).unwrap_or_default()
            )));
        }
        root.ok_or_else(|| ImportError::ParseError("Document has no root element".to_string()))
    }
}

fn collect_descendants<'a>(node: &'a XmlNode, out: &mut Vec<&'a XmlNode>) {
    for child in &node.children {
        out.push(child);
        collect_descendants(child, out);
    }
}

fn node_from_start(e: &BytesStart<'_>) -> Result<XmlNode, ImportError> {
    let mut node = XmlNode::new(&String::from_utf8_lossy(e.name().as_ref()));
    for attr in e.attributes() {
        let attr = attr.map_err(|e| ImportError::ParseError(format!("Bad attribute: {}", e)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| ImportError::ParseError(format!("Bad attribute value: {}", e)))?;
        node.attributes.insert(key, value.to_string());
    }
    Ok(node)
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
