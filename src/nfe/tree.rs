use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::core::IngestError;

/// Nesting depth beyond which input is rejected as malformed. Real NF-e
/// documents stay under 10.
const MAX_DEPTH: usize = 64;

/// A parsed XML element. Names are stored without namespace prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Concatenated, trimmed text content.
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// First direct child with the given name.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All direct children with the given name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Follow a slash-separated path of direct children, e.g. `"total/ICMSTot/vNF"`.
    pub fn at(&self, path: &str) -> Option<&XmlNode> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(self, |node, seg| node.child(seg))
    }

    /// Non-empty text at `path`, if any.
    pub fn text_at(&self, path: &str) -> Option<&str> {
        self.at(path)
            .map(|n| n.text.as_str())
            .filter(|t| !t.is_empty())
    }

    /// Text at `path`, or an empty string.
    pub fn text_or_empty(&self, path: &str) -> String {
        self.text_at(path).unwrap_or_default().to_string()
    }

    /// Attribute value by (local) name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Depth-first search for the first descendant (or self) with `name`.
    pub fn find(&self, name: &str) -> Option<&XmlNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }
}

/// Parse raw bytes into an element tree.
///
/// Fails with [`IngestError::MalformedInput`] when the bytes are not UTF-8,
/// are not well-formed XML, or contain no root element.
pub fn parse_tree(bytes: &[u8]) -> Result<XmlNode, IngestError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| IngestError::MalformedInput(format!("not valid UTF-8: {e}")))?;
    let text = text.trim_start_matches('\u{feff}');

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(IngestError::MalformedInput(format!(
                        "element nesting deeper than {MAX_DEPTH}"
                    )));
                }
                stack.push(open_node(e)?);
            }
            Ok(Event::Empty(ref e)) => {
                let node = open_node(e)?;
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::Text(ref e)) => {
                let t = e
                    .unescape()
                    .map_err(|e| IngestError::MalformedInput(format!("bad text content: {e}")))?;
                append_text(&mut stack, t.trim());
            }
            Ok(Event::CData(ref e)) => {
                let t = std::str::from_utf8(e)
                    .map_err(|e| IngestError::MalformedInput(format!("bad CDATA: {e}")))?;
                append_text(&mut stack, t.trim());
            }
            Ok(Event::End(_)) => {
                let node = stack.pop().ok_or_else(|| {
                    IngestError::MalformedInput("closing tag without opening tag".into())
                })?;
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(IngestError::MalformedInput(format!(
                    "XML parse error at byte {}: {e}",
                    reader.error_position()
                )));
            }
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(IngestError::MalformedInput(format!(
            "document ended inside <{}>",
            open.name
        )));
    }
    root.ok_or_else(|| IngestError::MalformedInput("no root element".into()))
}

fn open_node(e: &BytesStart<'_>) -> Result<XmlNode, IngestError> {
    let name = std::str::from_utf8(e.local_name().as_ref())
        .map_err(|e| IngestError::MalformedInput(format!("bad element name: {e}")))?
        .to_string();

    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr =
            attr.map_err(|e| IngestError::MalformedInput(format!("bad attribute: {e}")))?;
        let key = std::str::from_utf8(attr.key.local_name().as_ref())
            .unwrap_or_default()
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| IngestError::MalformedInput(format!("bad attribute value: {e}")))?
            .trim()
            .to_string();
        attributes.push((key, value));
    }

    Ok(XmlNode {
        name,
        attributes,
        ..XmlNode::default()
    })
}

fn append_text(stack: &mut [XmlNode], text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(top) = stack.last_mut() {
        top.text.push_str(text);
    }
}

fn attach(
    stack: &mut [XmlNode],
    root: &mut Option<XmlNode>,
    node: XmlNode,
) -> Result<(), IngestError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(node);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(node);
            Ok(())
        }
        None => Err(IngestError::MalformedInput(format!(
            "second root element <{}>",
            node.name
        ))),
    }
}
