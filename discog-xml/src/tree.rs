//! A minimal in-memory tree for one top-level XML element. Built iteratively
//! (no async recursion) from `quick_xml` events while the reader's cursor is
//! inside a single `<artist>`/`<label>`/`<master>`/`<release>` element.

use std::io;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tokio::io::AsyncBufRead;

use crate::error::XmlError;

#[derive(Debug, Clone, Default)]
pub struct RawElement {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<RawElement>,
}

impl RawElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn child(&self, tag: &str) -> Option<&RawElement> {
        self.children.iter().find(|c| c.tag == tag)
    }

    pub fn text_trimmed(&self) -> Option<String> {
        let trimmed = self.text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    pub fn child_text(&self, tag: &str) -> Option<String> {
        self.child(tag).and_then(RawElement::text_trimmed)
    }

    /// Attribute first, then child text — the reference schema is
    /// inconsistent about which form a given scalar takes, so scalar
    /// extraction checks both rather than committing to one.
    pub fn scalar(&self, name: &str) -> Option<String> {
        self.attr(name).map(str::to_string).or_else(|| self.child_text(name))
    }

    /// `id`+`name` pair, tolerant of either `<name id="1">Text</name>` or
    /// `<item id="1" name="Text"/>`. Either side is omitted, not nulled, if
    /// absent.
    pub fn id_name(&self) -> serde_json::Value {
        let id = self.scalar("id").and_then(|s| s.parse::<i64>().ok());
        let name = self.attr("name").map(str::to_string).or_else(|| self.text_trimmed());
        let mut map = serde_json::Map::new();
        if let Some(id) = id {
            map.insert("id".to_string(), serde_json::json!(id));
        }
        if let Some(name) = name {
            map.insert("name".to_string(), serde_json::Value::String(name));
        }
        serde_json::Value::Object(map)
    }

    /// Collects the text of every child of a pluralizing wrapper element,
    /// e.g. `<urls><url>a</url><url>b</url></urls>` -> `["a", "b"]`.
    pub fn list_texts(&self, wrapper: &str) -> Vec<String> {
        self.child(wrapper)
            .map(|w| w.children.iter().filter_map(RawElement::text_trimmed).collect())
            .unwrap_or_default()
    }

    /// Iterates the child elements of a pluralizing wrapper in document
    /// order, for callers that need more than just text.
    pub fn list_items<'a>(&'a self, wrapper: &str) -> impl Iterator<Item = &'a RawElement> {
        self.child(wrapper).map(|w| w.children.iter()).into_iter().flatten()
    }
}

fn decode_attributes(start: &BytesStart) -> Result<Vec<(String, String)>, XmlError> {
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(XmlError::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attributes.push((key, value));
    }
    Ok(attributes)
}

fn local_tag(start: &BytesStart) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

/// Reads one complete element's subtree, given that `reader` has just
/// yielded the `Event::Start` for it (`tag`/`attributes` already decoded).
///
/// Non-recursive: an explicit stack stands in for the call stack so this
/// works across `.await` points without boxing a recursive future.
pub async fn read_subtree<R: AsyncBufRead + Unpin>(
    reader: &mut Reader<R>,
    buf: &mut Vec<u8>,
    tag: String,
    attributes: Vec<(String, String)>,
) -> Result<RawElement, XmlError> {
    let mut stack = vec![RawElement { tag, attributes, text: String::new(), children: Vec::new() }];

    loop {
        buf.clear();
        match reader.read_event_into_async(buf).await? {
            Event::Start(start) => {
                let tag = local_tag(&start);
                let attributes = decode_attributes(&start)?;
                stack.push(RawElement { tag, attributes, text: String::new(), children: Vec::new() });
            }
            Event::Empty(start) => {
                let tag = local_tag(&start);
                let attributes = decode_attributes(&start)?;
                let element = RawElement { tag, attributes, text: String::new(), children: Vec::new() };
                stack.last_mut().expect("stack non-empty while inside subtree").children.push(element);
            }
            Event::Text(text) => {
                let decoded = text.unescape()?;
                stack.last_mut().expect("stack non-empty while inside subtree").text.push_str(&decoded);
            }
            Event::CData(cdata) => {
                let decoded = String::from_utf8_lossy(&cdata.into_inner()).into_owned();
                stack.last_mut().expect("stack non-empty while inside subtree").text.push_str(&decoded);
            }
            Event::End(_) => {
                let finished = stack.pop().expect("stack non-empty while inside subtree");
                match stack.last_mut() {
                    Some(parent) => parent.children.push(finished),
                    None => return Ok(finished),
                }
            }
            Event::Eof => {
                return Err(XmlError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside an open element",
                )));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::reader::Reader;
    use tokio::io::BufReader;

    async fn parse_one(xml: &str) -> RawElement {
        let cursor = std::io::Cursor::new(xml.as_bytes().to_vec());
        let mut reader = Reader::from_reader(BufReader::new(cursor));
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_event_into_async(&mut buf).await.unwrap() {
                Event::Start(start) => {
                    let tag = local_tag(&start);
                    let attrs = decode_attributes(&start).unwrap();
                    return read_subtree(&mut reader, &mut Vec::new(), tag, attrs).await.unwrap();
                }
                Event::Eof => panic!("no start tag found"),
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn builds_nested_tree_with_attributes_and_text() {
        let elem = parse_one(
            r#"<artist id="1"><name>Test Artist</name><urls><url>http://a</url><url>http://b</url></urls></artist>"#,
        )
        .await;

        assert_eq!(elem.tag, "artist");
        assert_eq!(elem.attr("id"), Some("1"));
        assert_eq!(elem.child_text("name"), Some("Test Artist".to_string()));
        assert_eq!(elem.list_texts("urls"), vec!["http://a", "http://b"]);
    }

    #[tokio::test]
    async fn id_name_handles_attribute_and_text_forms() {
        let elem = parse_one(r#"<aliases><name id="5">Alias One</name></aliases>"#).await;
        let item = elem.children.first().unwrap();
        let value = item.id_name();
        assert_eq!(value["id"], 5);
        assert_eq!(value["name"], "Alias One");
    }
}
