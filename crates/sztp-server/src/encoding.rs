//! RESTCONF content encodings
//!
//! Documents are handled internally as JSON (RFC 7951). The XML form
//! (RFC 7950) is derived structurally: each top-level member becomes an
//! element whose `xmlns` is `urn:ietf:params:xml:ns:yang:<module>`, arrays
//! become repeated sibling elements and an empty leaf (`[null]`) becomes an
//! empty element.

use crate::error::HandlerError;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Value};
use sztp_core::ErrorTag;
use thiserror::Error;

const NS_PREFIX: &str = "urn:ietf:params:xml:ns:yang:";

pub const YANG_DATA_JSON: &str = "application/yang-data+json";
pub const YANG_DATA_XML: &str = "application/yang-data+xml";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EncodingError(pub String);

impl EncodingError {
    fn new(msg: impl Into<String>) -> Self {
        EncodingError(msg.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Xml,
}

impl Encoding {
    pub fn media_type(self) -> &'static str {
        match self {
            Encoding::Json => YANG_DATA_JSON,
            Encoding::Xml => YANG_DATA_XML,
        }
    }

    /// Encoding named by a `Content-Type` value (parameters ignored)
    pub fn from_media_type(value: &str) -> Option<Encoding> {
        let base = value.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match base.as_str() {
            YANG_DATA_JSON | "application/json" => Some(Encoding::Json),
            YANG_DATA_XML | "application/xml" => Some(Encoding::Xml),
            _ => None,
        }
    }

    /// Pick the response encoding from an `Accept` header. Wildcards and an
    /// absent header yield `fallback`.
    pub fn negotiate(accept: Option<&str>, allowed: &[Encoding], fallback: Encoding) -> Option<Encoding> {
        let Some(accept) = accept.filter(|a| !a.trim().is_empty()) else {
            return Some(fallback);
        };
        for range in accept.split(',') {
            let base = range.split(';').next().unwrap_or("").trim();
            if base == "*/*" || base == "application/*" {
                return Some(fallback);
            }
            if let Some(enc) = Encoding::from_media_type(base).filter(|e| allowed.contains(e)) {
                return Some(enc);
            }
        }
        None
    }

    pub fn encode(self, doc: &Value) -> Result<String, EncodingError> {
        match self {
            Encoding::Json => serde_json::to_string_pretty(doc).map_err(|e| EncodingError::new(e.to_string())),
            Encoding::Xml => json_to_xml(doc),
        }
    }

    pub fn decode(self, body: &[u8]) -> Result<Value, EncodingError> {
        let text = std::str::from_utf8(body).map_err(|e| EncodingError::new(e.to_string()))?;
        match self {
            Encoding::Json => serde_json::from_str(text).map_err(|e| EncodingError::new(e.to_string())),
            Encoding::Xml => xml_to_json(text),
        }
    }
}

/// Encoding of a request body, from its `Content-Type`. A missing header
/// defaults to JSON.
pub fn request_encoding(content_type: Option<&str>, allowed: &[Encoding]) -> Result<Encoding, HandlerError> {
    let Some(content_type) = content_type else {
        return Ok(Encoding::Json);
    };
    Encoding::from_media_type(content_type)
        .filter(|e| allowed.contains(e))
        .ok_or_else(|| {
            HandlerError::protocol(
                415,
                ErrorTag::InvalidValue,
                format!("Unsupported media type \"{}\".", content_type),
            )
        })
}

pub fn json_to_xml(doc: &Value) -> Result<String, EncodingError> {
    let top = doc
        .as_object()
        .ok_or_else(|| EncodingError::new("XML documents need a top-level object"))?;
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    for (qualified, value) in top {
        let (module, name) = qualified
            .split_once(':')
            .ok_or_else(|| EncodingError::new(format!("top-level member \"{}\" is not qualified", qualified)))?;
        let ns = format!("{}{}", NS_PREFIX, module);
        write_member(&mut writer, name, value, Some(&ns))?;
    }
    String::from_utf8(writer.into_inner()).map_err(|e| EncodingError::new(e.to_string()))
}

fn write_member(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    value: &Value,
    ns: Option<&str>,
) -> Result<(), EncodingError> {
    match value {
        Value::Array(items) => {
            for item in items {
                write_member(writer, name, item, ns)?;
            }
            Ok(())
        }
        Value::Object(members) => {
            write_event(writer, Event::Start(start(name, ns)))?;
            for (child, v) in members {
                let (child_ns, local) = match child.split_once(':') {
                    Some((module, local)) => (Some(format!("{}{}", NS_PREFIX, module)), local),
                    None => (None, child.as_str()),
                };
                write_member(writer, local, v, child_ns.as_deref())?;
            }
            write_event(writer, Event::End(BytesEnd::new(name)))
        }
        Value::Null => write_event(writer, Event::Empty(start(name, ns))),
        Value::String(s) => write_leaf(writer, name, s, ns),
        Value::Bool(b) => write_leaf(writer, name, &b.to_string(), ns),
        Value::Number(n) => write_leaf(writer, name, &n.to_string(), ns),
    }
}

fn start<'a>(name: &'a str, ns: Option<&'a str>) -> BytesStart<'a> {
    let elem = BytesStart::new(name);
    match ns {
        Some(ns) => elem.with_attributes([("xmlns", ns)]),
        None => elem,
    }
}

fn write_leaf(writer: &mut Writer<Vec<u8>>, name: &str, text: &str, ns: Option<&str>) -> Result<(), EncodingError> {
    write_event(writer, Event::Start(start(name, ns)))?;
    write_event(writer, Event::Text(BytesText::new(text)))?;
    write_event(writer, Event::End(BytesEnd::new(name)))
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), EncodingError> {
    writer
        .write_event(event)
        .map_err(|e| EncodingError::new(format!("XML write error: {}", e)))
}

/// Element under construction while parsing
struct Frame {
    name: String,
    members: Map<String, Value>,
    text: String,
}

impl Frame {
    fn new(name: String) -> Self {
        Self {
            name,
            members: Map::new(),
            text: String::new(),
        }
    }

    fn into_value(self) -> Value {
        if self.members.is_empty() {
            if self.text.is_empty() {
                Value::Array(vec![Value::Null])
            } else {
                Value::String(self.text)
            }
        } else {
            Value::Object(self.members)
        }
    }
}

/// Repeated siblings collapse into an array
fn add_member(members: &mut Map<String, Value>, name: String, value: Value) {
    match members.get_mut(&name) {
        None => {
            members.insert(name, value);
        }
        Some(Value::Array(items)) if !is_empty_leaf(items) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

fn is_empty_leaf(items: &[Value]) -> bool {
    matches!(items, [Value::Null])
}

fn element_name(elem: &BytesStart<'_>, top: bool) -> Result<String, EncodingError> {
    let local = std::str::from_utf8(elem.local_name().as_ref())
        .map_err(|e| EncodingError::new(e.to_string()))?
        .to_string();
    let mut module = None;
    for attr in elem.attributes() {
        let attr = attr.map_err(|e| EncodingError::new(format!("XML attribute error: {}", e)))?;
        if attr.key.as_ref() == b"xmlns" {
            let ns = std::str::from_utf8(&attr.value).map_err(|e| EncodingError::new(e.to_string()))?;
            module = ns.strip_prefix(NS_PREFIX).map(str::to_string);
        }
    }
    match module {
        Some(module) => Ok(format!("{}:{}", module, local)),
        None if top => Err(EncodingError::new(format!(
            "top-level element \"{}\" has no YANG namespace",
            local
        ))),
        None => Ok(local),
    }
}

fn resolve_reference(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x") {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}

pub fn xml_to_json(xml: &str) -> Result<Value, EncodingError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut root = Map::new();
    let mut stack: Vec<Frame> = Vec::new();
    loop {
        let event = reader
            .read_event()
            .map_err(|e| EncodingError::new(format!("XML parse error: {}", e)))?;
        match event {
            Event::Start(elem) => {
                let name = element_name(&elem, stack.is_empty())?;
                stack.push(Frame::new(name));
            }
            Event::Empty(elem) => {
                let name = element_name(&elem, stack.is_empty())?;
                let value = Frame::new(name.clone()).into_value();
                match stack.last_mut() {
                    Some(parent) => add_member(&mut parent.members, name, value),
                    None => add_member(&mut root, name, value),
                }
            }
            Event::Text(text) => {
                if let Some(frame) = stack.last_mut() {
                    let text = std::str::from_utf8(&text).map_err(|e| EncodingError::new(e.to_string()))?;
                    frame.text.push_str(text);
                }
            }
            Event::GeneralRef(reference) => {
                let name = std::str::from_utf8(&reference).map_err(|e| EncodingError::new(e.to_string()))?;
                let ch = resolve_reference(name)
                    .ok_or_else(|| EncodingError::new(format!("unknown entity \"&{};\"", name)))?;
                if let Some(frame) = stack.last_mut() {
                    frame.text.push(ch);
                }
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| EncodingError::new("unbalanced closing tag"))?;
                let name = frame.name.clone();
                let value = frame.into_value();
                match stack.last_mut() {
                    Some(parent) => add_member(&mut parent.members, name, value),
                    None => add_member(&mut root, name, value),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err(EncodingError::new("unexpected end of document"));
    }
    if root.is_empty() {
        return Err(EncodingError::new("empty document"));
    }
    Ok(Value::Object(root))
}
