//! Tree to XML codec and back
//!
//! This module is the only component aware of the wire namespaces and of
//! the reserved `$`/`_` mapping keys. Encoding turns a [`Value`] mapping
//! into an XML document with a declaration header; decoding turns an XML
//! message into a [`Value`], folding repeated sibling elements into lists
//! and coercing integer-looking text. It also classifies incoming messages
//! and extracts `rpc-error` details from replies.

use quick_xml::escape::unescape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{Error, RpcError, RpcErrorInfo};
use crate::value::{Map, Value, ATTRIBUTES, TEXT};

pub const BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
pub const BASE_CAPABILITY: &str = "urn:ietf:params:netconf:base:1.0";
pub const NOTIFICATION_NS: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";
pub const NMDA_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-nmda";
pub const DATASTORES_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-datastores";
pub const YANG_NS: &str = "urn:ietf:params:xml:ns:yang:1";

/// Coarse classification of a decoded message by its root element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Hello,
    Reply,
    Notification,
    Other,
}

pub fn classify(tree: &Value) -> MessageKind {
    if tree.get("hello").is_some() {
        MessageKind::Hello
    } else if tree.get("rpc-reply").is_some() {
        MessageKind::Reply
    } else if tree.get("notification").is_some() {
        MessageKind::Notification
    } else {
        MessageKind::Other
    }
}

/// Encodes a mapping into an XML document with a declaration header.
pub fn encode(root: &Value) -> Result<String, Error> {
    let map = root
        .as_map()
        .ok_or_else(|| Error::Xml("document root must be a mapping".to_owned()))?;
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| Error::Xml(e.to_string()))?;
    for (name, value) in map {
        write_element(&mut writer, name, value)?;
    }
    String::from_utf8(writer.into_inner()).map_err(|e| Error::Xml(e.to_string()))
}

fn write_element(writer: &mut Writer<Vec<u8>>, name: &str, value: &Value) -> Result<(), Error> {
    let fail = |e| Error::Xml(format!("{}", e));
    match value {
        // a list under one name becomes repeated sibling elements
        Value::List(items) => {
            for item in items {
                write_element(writer, name, item)?;
            }
        }
        Value::Map(map) => {
            let mut start = BytesStart::new(name);
            if let Some(Value::Map(attributes)) = map.get(ATTRIBUTES) {
                for (key, attr) in attributes {
                    let text = attr.to_text().unwrap_or_default();
                    start.push_attribute((key.as_str(), text.as_str()));
                }
            }
            let text = map.get(TEXT).and_then(Value::to_text);
            let children: Vec<(&String, &Value)> = map
                .iter()
                .filter(|(key, _)| *key != ATTRIBUTES && *key != TEXT)
                .collect();
            if children.is_empty() && text.as_deref().unwrap_or_default().is_empty() {
                writer.write_event(Event::Empty(start)).map_err(fail)?;
            } else {
                writer.write_event(Event::Start(start)).map_err(fail)?;
                if let Some(text) = text {
                    writer
                        .write_event(Event::Text(BytesText::new(&text)))
                        .map_err(fail)?;
                }
                for (child, value) in children {
                    write_element(writer, child, value)?;
                }
                writer
                    .write_event(Event::End(BytesEnd::new(name)))
                    .map_err(fail)?;
            }
        }
        primitive => {
            let text = primitive.to_text().unwrap_or_default();
            let start = BytesStart::new(name);
            if text.is_empty() {
                writer.write_event(Event::Empty(start)).map_err(fail)?;
            } else {
                writer.write_event(Event::Start(start)).map_err(fail)?;
                writer
                    .write_event(Event::Text(BytesText::new(&text)))
                    .map_err(fail)?;
                writer
                    .write_event(Event::End(BytesEnd::new(name)))
                    .map_err(fail)?;
            }
        }
    }
    Ok(())
}

struct PendingElement {
    name: String,
    map: Map,
    text: String,
}

/// Decodes an XML message into a mapping keyed by its root element name.
pub fn decode(xml: &str, ignore_attributes: bool) -> Result<Value, Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<PendingElement> = Vec::new();
    let mut root = Map::new();
    loop {
        match reader.read_event().map_err(|e| Error::Xml(e.to_string()))? {
            Event::Start(e) => stack.push(open_element(&e, ignore_attributes)?),
            Event::Empty(e) => {
                let element = open_element(&e, ignore_attributes)?;
                close_element(element, &mut stack, &mut root);
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| Error::Xml("unbalanced end tag".to_owned()))?;
                close_element(element, &mut stack, &mut root);
            }
            Event::Text(t) => {
                if let Some(open) = stack.last_mut() {
                    let decoded = t.decode().map_err(|e| Error::Xml(e.to_string()))?;
                    let piece = unescape(&decoded).map_err(|e| Error::Xml(e.to_string()))?;
                    open.text.push_str(&piece);
                }
            }
            Event::CData(t) => {
                if let Some(open) = stack.last_mut() {
                    open.text
                        .push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err(Error::Xml("truncated document".to_owned()));
    }
    Ok(Value::Map(root))
}

fn open_element(start: &BytesStart, ignore_attributes: bool) -> Result<PendingElement, Error> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut map = Map::new();
    if !ignore_attributes {
        let mut attributes = Map::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|e| Error::Xml(e.to_string()))?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute
                .unescape_value()
                .map_err(|e| Error::Xml(e.to_string()))?;
            attributes.insert(key, Value::Str(value.into_owned()));
        }
        if !attributes.is_empty() {
            map.insert(ATTRIBUTES.to_owned(), Value::Map(attributes));
        }
    }
    Ok(PendingElement {
        name,
        map,
        text: String::new(),
    })
}

fn close_element(element: PendingElement, stack: &mut Vec<PendingElement>, root: &mut Map) {
    let PendingElement { name, mut map, text } = element;
    let text = text.trim();
    let value = if map.is_empty() {
        if text.is_empty() {
            Value::Null
        } else {
            coerce(text)
        }
    } else {
        if !text.is_empty() {
            map.insert(TEXT.to_owned(), coerce(text));
        }
        Value::Map(map)
    };
    let parent = match stack.last_mut() {
        Some(open) => &mut open.map,
        None => root,
    };
    insert_child(parent, name, value);
}

/// Repeated sibling names fold into a list under that name.
fn insert_child(map: &mut Map, name: String, value: Value) {
    match map.get_mut(&name) {
        Some(Value::List(items)) => items.push(value),
        Some(existing) => {
            let first = std::mem::take(existing);
            *existing = Value::List(vec![first, value]);
        }
        None => {
            map.insert(name, value);
        }
    }
}

fn coerce(text: &str) -> Value {
    match text.parse::<i64>() {
        Ok(n) => Value::Int(n),
        Err(_) => Value::Str(text.to_owned()),
    }
}

/// Fast-path scan for the `message-id` attribute of an `rpc-reply`,
/// performed on the raw text before a full parse.
pub(crate) fn scan_message_id(text: &str) -> Option<u64> {
    let reply = text.find("<rpc-reply")?;
    let rest = &text[reply..];
    let rest = &rest[rest.find("message-id=")? + "message-id=".len()..];
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let rest = &rest[1..];
    rest[..rest.find(quote)?].trim().parse().ok()
}

/// Extracts a classified error from a decoded `rpc-reply`, if any.
pub fn reply_error(tree: &Value) -> Option<RpcError> {
    let reply = tree.get("rpc-reply")?;
    let error = reply.get("rpc-error")?;
    let error = match error {
        Value::List(items) => items.first()?,
        other => other,
    };
    let info = error.get("error-info").map(|info| RpcErrorInfo {
        bad_element: field_text(info, "bad-element"),
        bad_namespace: field_text(info, "bad-namespace"),
        bad_content: field_text(info, "bad-content"),
    });
    let tag = field_text(error, "error-tag");
    let message = field_text(error, "error-message")
        .or_else(|| inferred_message(tag.as_deref(), info.as_ref()))
        .or_else(|| tag.clone())
        .unwrap_or_else(|| "unknown RPC error".to_owned());
    Some(RpcError {
        error_type: field_text(error, "error-type"),
        tag,
        severity: field_text(error, "error-severity"),
        message,
        info,
    })
}

/// Text of a named child: either a primitive or the `_` text of a mapping
/// that also carries attributes.
fn field_text(node: &Value, key: &str) -> Option<String> {
    let child = node.get(key)?;
    let text = match child {
        Value::Map(map) => map.get(TEXT)?.to_text()?,
        primitive => primitive.to_text()?,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn inferred_message(tag: Option<&str>, info: Option<&RpcErrorInfo>) -> Option<String> {
    let bad_element = info.and_then(|i| i.bad_element.as_deref());
    let bad_namespace = info.and_then(|i| i.bad_namespace.as_deref());
    match tag? {
        "unknown-element" => Some(match bad_element {
            Some(element) => format!("Unknown element '{}'", element),
            None => "Unknown element".to_owned(),
        }),
        "unknown-namespace" => Some(match (bad_namespace, bad_element) {
            (Some(ns), Some(element)) => {
                format!("Unknown namespace '{}' for element '{}'", ns, element)
            }
            (Some(ns), None) => format!("Unknown namespace '{}'", ns),
            _ => "Unknown namespace".to_owned(),
        }),
        "data-exists" => Some("Data already exists".to_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, Value)]) -> Value {
        Value::Map(
            entries
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn encodes_attributes_text_and_lists() {
        let tree = map(&[(
            "rpc",
            map(&[
                (
                    "$",
                    map(&[("xmlns", BASE_NS.into()), ("message-id", "1".into())]),
                ),
                (
                    "vlan",
                    map(&[("$", map(&[("id", "7".into())])), ("_", "trunk".into())]),
                ),
                ("port", Value::List(vec![Value::Int(1), Value::Int(2)])),
                ("empty", Value::Null),
            ]),
        )]);
        let xml = encode(&tree).unwrap();
        assert_eq!(
            xml,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <rpc xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\" message-id=\"1\">\
             <vlan id=\"7\">trunk</vlan>\
             <port>1</port><port>2</port>\
             <empty/></rpc>"
        );
    }

    #[test]
    fn encode_escapes_text() {
        let tree = map(&[("a", "x < y & z".into())]);
        assert!(encode(&tree).unwrap().contains("x &lt; y &amp; z"));
    }

    #[test]
    fn decodes_server_hello() {
        let xml = r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
            <capabilities>
                <capability>urn:ietf:params:netconf:base:1.0</capability>
                <capability>urn:ietf:params:netconf:base:1.1</capability>
            </capabilities>
            <session-id>4</session-id>
        </hello>"#;
        let tree = decode(xml, true).unwrap();
        assert_eq!(classify(&tree), MessageKind::Hello);
        let hello = tree.get("hello").unwrap();
        assert_eq!(hello.get("session-id"), Some(&Value::Int(4)));
        let capability = hello
            .get("capabilities")
            .and_then(|c| c.get("capability"))
            .and_then(Value::as_list)
            .unwrap();
        assert_eq!(capability.len(), 2);
    }

    #[test]
    fn attributes_land_under_the_reserved_key() {
        let tree = decode(r#"<a x="1"><b>t</b></a>"#, false).unwrap();
        assert_eq!(
            tree.get("a")
                .and_then(|a| a.get("$"))
                .and_then(|attrs| attrs.get("x")),
            Some(&Value::Str("1".into()))
        );
        let tree = decode(r#"<a x="1"><b>t</b></a>"#, true).unwrap();
        assert_eq!(tree.get("a").and_then(|a| a.get("$")), None);
    }

    #[test]
    fn mixed_text_goes_to_the_text_key() {
        let tree = decode(r#"<a x="1">body</a>"#, false).unwrap();
        assert_eq!(
            tree.get("a").and_then(|a| a.get("_")),
            Some(&Value::Str("body".into()))
        );
    }

    #[test]
    fn repeated_siblings_fold_into_a_list() {
        let tree = decode("<l><item>1</item><item>2</item><item>3</item></l>", true).unwrap();
        assert_eq!(
            tree.get("l").and_then(|l| l.get("item")),
            Some(&Value::List(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3)
            ]))
        );
    }

    #[test]
    fn empty_elements_decode_to_null() {
        let tree = decode("<rpc-reply><ok/></rpc-reply>", true).unwrap();
        assert_eq!(
            tree.get("rpc-reply").and_then(|r| r.get("ok")),
            Some(&Value::Null)
        );
    }

    #[test]
    fn round_trips_a_canonical_tree() {
        let tree = map(&[(
            "config",
            map(&[
                ("name", "eth1".into()),
                ("mtu", Value::Int(1500)),
                ("unit", Value::List(vec![Value::Int(0), Value::Int(1)])),
            ]),
        )]);
        let xml = encode(&tree).unwrap();
        assert_eq!(decode(&xml, true).unwrap(), tree);
    }

    #[test]
    fn scans_message_ids_before_parsing() {
        assert_eq!(
            scan_message_id(r#"<rpc-reply message-id="42" xmlns="x"><ok/></rpc-reply>"#),
            Some(42)
        );
        assert_eq!(
            scan_message_id(r#"<rpc-reply xmlns="x" message-id='7'><ok/></rpc-reply>"#),
            Some(7)
        );
        assert_eq!(scan_message_id("<notification><x/></notification>"), None);
        assert_eq!(scan_message_id("<rpc-reply><ok/></rpc-reply>"), None);
    }

    #[test]
    fn extracts_explicit_error_messages() {
        let xml = r#"<rpc-reply message-id="1">
            <rpc-error>
                <error-type>protocol</error-type>
                <error-tag>operation-failed</error-tag>
                <error-severity>error</error-severity>
                <error-message xml:lang="en">Invalid operation</error-message>
            </rpc-error>
        </rpc-reply>"#;
        let error = reply_error(&decode(xml, false).unwrap()).unwrap();
        assert_eq!(error.message, "Invalid operation");
        assert_eq!(error.tag.as_deref(), Some("operation-failed"));
        assert_eq!(error.severity.as_deref(), Some("error"));
    }

    #[test]
    fn infers_messages_from_the_error_tag() {
        let xml = r#"<rpc-reply message-id="1">
            <rpc-error>
                <error-tag>unknown-element</error-tag>
                <error-info><bad-element>interfaces</bad-element></error-info>
            </rpc-error>
        </rpc-reply>"#;
        let error = reply_error(&decode(xml, true).unwrap()).unwrap();
        assert_eq!(error.message, "Unknown element 'interfaces'");
        assert_eq!(
            error.info.unwrap().bad_element.as_deref(),
            Some("interfaces")
        );

        let xml = r#"<rpc-reply message-id="1">
            <rpc-error><error-tag>data-exists</error-tag></rpc-error>
        </rpc-reply>"#;
        let error = reply_error(&decode(xml, true).unwrap()).unwrap();
        assert_eq!(error.message, "Data already exists");
    }

    #[test]
    fn falls_back_to_the_raw_tag() {
        let xml = r#"<rpc-reply message-id="1">
            <rpc-error><error-tag>too-big</error-tag></rpc-error>
        </rpc-reply>"#;
        let error = reply_error(&decode(xml, true).unwrap()).unwrap();
        assert_eq!(error.message, "too-big");
    }

    #[test]
    fn replies_without_errors_extract_nothing() {
        let tree = decode(r#"<rpc-reply message-id="1"><ok/></rpc-reply>"#, true).unwrap();
        assert!(reply_error(&tree).is_none());
    }
}
