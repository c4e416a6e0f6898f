//! Per-entity-class projection from a [`RawElement`] to canonical JSON.
//!
//! Fields not in the known set for a class are preserved under `_extra` as a
//! map of tag name to raw text rather than dropped. Absent optional scalars
//! and empty list fields are omitted entirely rather than written as
//! `null`/`[]`.

use discog_types::EntityClass;
use serde_json::{Map, Value, json};

use crate::error::XmlError;
use crate::tree::RawElement;

pub fn project(class: EntityClass, element: &RawElement) -> Result<(i64, Value), XmlError> {
    match class {
        EntityClass::Artist => project_artist(element),
        EntityClass::Label => project_label(element),
        EntityClass::Master => project_master(element),
        EntityClass::Release => project_release(element),
    }
}

fn root_id(element: &RawElement) -> Result<i64, XmlError> {
    let raw = element.scalar("id").ok_or(XmlError::MissingId)?;
    raw.parse::<i64>().map_err(|_| XmlError::InvalidId(raw))
}

fn collect_extra(element: &RawElement, known: &[&str]) -> Option<Value> {
    let mut extra = Map::new();
    for child in &element.children {
        if known.contains(&child.tag.as_str()) {
            continue;
        }
        if let Some(text) = child.text_trimmed() {
            extra.insert(child.tag.clone(), Value::String(text));
        }
    }
    (!extra.is_empty()).then(|| Value::Object(extra))
}

fn insert_if_some(map: &mut Map<String, Value>, key: &str, value: Option<String>) {
    if let Some(value) = value {
        map.insert(key.to_string(), Value::String(value));
    }
}

fn insert_id_if_some(map: &mut Map<String, Value>, key: &str, value: Option<i64>) {
    if let Some(value) = value {
        map.insert(key.to_string(), json!(value));
    }
}

fn insert_str_list(map: &mut Map<String, Value>, key: &str, items: Vec<String>) {
    if !items.is_empty() {
        map.insert(key.to_string(), Value::Array(items.into_iter().map(Value::String).collect()));
    }
}

fn insert_list(map: &mut Map<String, Value>, key: &str, items: Vec<Value>) {
    if !items.is_empty() {
        map.insert(key.to_string(), Value::Array(items));
    }
}

const ARTIST_KNOWN: &[&str] = &["name", "realname", "profile", "urls", "namevariations", "aliases", "members", "groups"];

fn project_artist(element: &RawElement) -> Result<(i64, Value), XmlError> {
    let id = root_id(element)?;
    let mut out = Map::new();
    out.insert("id".to_string(), json!(id));
    insert_if_some(&mut out, "name", element.child_text("name"));
    insert_if_some(&mut out, "realname", element.child_text("realname"));
    insert_if_some(&mut out, "profile", element.child_text("profile"));
    insert_str_list(&mut out, "urls", element.list_texts("urls"));
    insert_str_list(&mut out, "namevariations", element.list_texts("namevariations"));
    insert_list(&mut out, "aliases", element.list_items("aliases").map(RawElement::id_name).collect());
    insert_list(&mut out, "members", element.list_items("members").map(RawElement::id_name).collect());
    insert_list(&mut out, "groups", element.list_items("groups").map(RawElement::id_name).collect());
    if let Some(extra) = collect_extra(element, ARTIST_KNOWN) {
        out.insert("_extra".to_string(), extra);
    }
    Ok((id, Value::Object(out)))
}

const LABEL_KNOWN: &[&str] = &["name", "contactinfo", "profile", "parentLabel", "sublabels", "urls"];

fn project_label(element: &RawElement) -> Result<(i64, Value), XmlError> {
    let id = root_id(element)?;
    let mut out = Map::new();
    out.insert("id".to_string(), json!(id));
    insert_if_some(&mut out, "name", element.child_text("name"));
    insert_if_some(&mut out, "contactinfo", element.child_text("contactinfo"));
    insert_if_some(&mut out, "profile", element.child_text("profile"));
    if let Some(parent) = element.child("parentLabel") {
        out.insert("parentLabel".to_string(), parent.id_name());
    }
    insert_list(&mut out, "sublabels", element.list_items("sublabels").map(RawElement::id_name).collect());
    insert_str_list(&mut out, "urls", element.list_texts("urls"));
    if let Some(extra) = collect_extra(element, LABEL_KNOWN) {
        out.insert("_extra".to_string(), extra);
    }
    Ok((id, Value::Object(out)))
}

fn project_master_artist(item: &RawElement) -> Value {
    let mut out = Map::new();
    insert_id_if_some(&mut out, "id", item.scalar("id").and_then(|s| s.parse::<i64>().ok()));
    insert_if_some(&mut out, "name", item.child_text("name"));
    insert_if_some(&mut out, "anv", item.child_text("anv"));
    insert_if_some(&mut out, "join", item.child_text("join"));
    insert_if_some(&mut out, "role", item.child_text("role"));
    insert_if_some(&mut out, "tracks", item.child_text("tracks"));
    Value::Object(out)
}

fn project_video(item: &RawElement) -> Value {
    let mut out = Map::new();
    insert_if_some(&mut out, "src", item.scalar("src"));
    insert_if_some(&mut out, "title", item.child_text("title").or_else(|| item.scalar("title")));
    insert_if_some(&mut out, "description", item.child_text("description"));
    Value::Object(out)
}

const MASTER_KNOWN: &[&str] = &["title", "year", "genres", "styles", "artists", "videos", "main_release"];

fn project_master(element: &RawElement) -> Result<(i64, Value), XmlError> {
    let id = root_id(element)?;
    let mut out = Map::new();
    out.insert("id".to_string(), json!(id));
    insert_if_some(&mut out, "title", element.child_text("title"));
    insert_if_some(&mut out, "year", element.child_text("year"));
    insert_str_list(&mut out, "genres", element.list_texts("genres"));
    insert_str_list(&mut out, "styles", element.list_texts("styles"));
    insert_list(&mut out, "artists", element.list_items("artists").map(project_master_artist).collect());
    insert_list(&mut out, "videos", element.list_items("videos").map(project_video).collect());
    insert_if_some(&mut out, "main_release", element.child_text("main_release"));
    if let Some(extra) = collect_extra(element, MASTER_KNOWN) {
        out.insert("_extra".to_string(), extra);
    }
    Ok((id, Value::Object(out)))
}

fn project_release_artist(item: &RawElement) -> Value {
    let mut out = Map::new();
    insert_id_if_some(&mut out, "id", item.scalar("id").and_then(|s| s.parse::<i64>().ok()));
    insert_if_some(&mut out, "name", item.child_text("name"));
    insert_if_some(&mut out, "anv", item.child_text("anv"));
    insert_if_some(&mut out, "join", item.child_text("join"));
    insert_if_some(&mut out, "role", item.child_text("role"));
    Value::Object(out)
}

fn project_release_label(item: &RawElement) -> Value {
    let mut out = Map::new();
    insert_id_if_some(&mut out, "id", item.scalar("id").and_then(|s| s.parse::<i64>().ok()));
    insert_if_some(&mut out, "name", item.scalar("name"));
    insert_if_some(&mut out, "catno", item.scalar("catno"));
    Value::Object(out)
}

fn project_format(item: &RawElement) -> Value {
    let mut out = Map::new();
    insert_if_some(&mut out, "name", item.scalar("name"));
    insert_if_some(&mut out, "qty", item.scalar("qty"));
    insert_str_list(&mut out, "descriptions", item.list_texts("descriptions"));
    Value::Object(out)
}

fn project_identifier(item: &RawElement) -> Value {
    let mut out = Map::new();
    insert_if_some(&mut out, "type", item.scalar("type"));
    insert_if_some(&mut out, "value", item.scalar("value"));
    insert_if_some(&mut out, "description", item.scalar("description"));
    Value::Object(out)
}

fn project_track(item: &RawElement) -> Value {
    let mut out = Map::new();
    insert_if_some(&mut out, "position", item.child_text("position"));
    insert_if_some(&mut out, "title", item.child_text("title"));
    insert_if_some(&mut out, "duration", item.child_text("duration"));
    Value::Object(out)
}

fn project_company(item: &RawElement) -> Value {
    let mut out = Map::new();
    insert_id_if_some(&mut out, "id", item.scalar("id").and_then(|s| s.parse::<i64>().ok()));
    insert_if_some(&mut out, "name", item.child_text("name"));
    insert_if_some(&mut out, "entity_type", item.child_text("entity_type"));
    insert_if_some(&mut out, "entity_type_name", item.child_text("entity_type_name"));
    Value::Object(out)
}

const RELEASE_KNOWN: &[&str] = &[
    "title", "status", "released", "country", "notes", "genres", "styles", "artists", "labels", "formats",
    "identifiers", "tracklist", "companies",
];

fn project_release(element: &RawElement) -> Result<(i64, Value), XmlError> {
    let id = root_id(element)?;
    let mut out = Map::new();
    out.insert("id".to_string(), json!(id));
    insert_if_some(&mut out, "title", element.child_text("title"));
    insert_if_some(&mut out, "status", element.scalar("status"));
    insert_if_some(&mut out, "released", element.child_text("released"));
    insert_if_some(&mut out, "country", element.child_text("country"));
    insert_if_some(&mut out, "notes", element.child_text("notes"));
    insert_str_list(&mut out, "genres", element.list_texts("genres"));
    insert_str_list(&mut out, "styles", element.list_texts("styles"));
    insert_list(&mut out, "artists", element.list_items("artists").map(project_release_artist).collect());
    insert_list(&mut out, "labels", element.list_items("labels").map(project_release_label).collect());
    insert_list(&mut out, "formats", element.list_items("formats").map(project_format).collect());
    insert_list(&mut out, "identifiers", element.list_items("identifiers").map(project_identifier).collect());
    insert_list(&mut out, "tracklist", element.list_items("tracklist").map(project_track).collect());
    insert_list(&mut out, "companies", element.list_items("companies").map(project_company).collect());
    if let Some(extra) = collect_extra(element, RELEASE_KNOWN) {
        out.insert("_extra".to_string(), extra);
    }
    Ok((id, Value::Object(out)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::read_subtree;
    use quick_xml::events::Event;
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
                    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                    let mut attrs = Vec::new();
                    for attr in start.attributes() {
                        let attr = attr.unwrap();
                        attrs.push((
                            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                            attr.unescape_value().unwrap().into_owned(),
                        ));
                    }
                    return read_subtree(&mut reader, &mut Vec::new(), tag, attrs).await.unwrap();
                }
                Event::Eof => panic!("no start tag found"),
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn projects_artist_with_nested_lists() {
        let elem = parse_one(
            r#"<artist id="42">
                <name>Test Artist</name>
                <urls><url>http://a</url></urls>
                <aliases><name id="7">Other Name</name></aliases>
                <weird_field>leftover</weird_field>
            </artist>"#,
        )
        .await;

        let (id, value) = project(EntityClass::Artist, &elem).unwrap();
        assert_eq!(id, 42);
        assert_eq!(value["name"], "Test Artist");
        assert_eq!(value["urls"][0], "http://a");
        assert_eq!(value["aliases"][0]["id"], 7);
        assert_eq!(value["_extra"]["weird_field"], "leftover");
    }

    #[tokio::test]
    async fn missing_id_is_an_error() {
        let elem = parse_one(r#"<artist><name>No Id</name></artist>"#).await;
        assert!(matches!(project(EntityClass::Artist, &elem), Err(XmlError::MissingId)));
    }

    #[tokio::test]
    async fn minimal_artist_omits_absent_optionals_and_empty_lists() {
        let elem = parse_one(r#"<artist id="1"><name>A</name></artist>"#).await;
        let (_, value) = project(EntityClass::Artist, &elem).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object.len(), 2);
        assert_eq!(value["id"], 1);
        assert_eq!(value["name"], "A");
        assert!(!object.contains_key("urls"));
        assert!(!object.contains_key("aliases"));
        assert!(!object.contains_key("members"));
        assert!(!object.contains_key("groups"));
        assert!(!object.contains_key("namevariations"));
        assert!(!object.contains_key("realname"));
        assert!(!object.contains_key("profile"));
    }

    #[tokio::test]
    async fn projects_release_with_attribute_based_labels() {
        let elem = parse_one(
            r#"<release id="1" status="Accepted">
                <title>An Album</title>
                <labels><label id="9" name="Some Label" catno="CAT-1"/></labels>
                <tracklist><track><position>A1</position><title>Track One</title></track></tracklist>
            </release>"#,
        )
        .await;

        let (_, value) = project(EntityClass::Release, &elem).unwrap();
        assert_eq!(value["status"], "Accepted");
        assert_eq!(value["labels"][0]["catno"], "CAT-1");
        assert_eq!(value["tracklist"][0]["title"], "Track One");
    }
}
