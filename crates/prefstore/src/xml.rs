//! XML codec for the document backend.
//!
//! Serializes a settings map to a small, human-readable document:
//!
//! ```text
//! <?xml version="1.0" encoding="utf-8"?>
//! <preferences version="1.0">
//!     <int key="count">5</int>
//!     <string key="name">hello</string>
//!     <intArray key="ids">
//!         <item>1</item>
//!         <item>2</item>
//!     </intArray>
//! </preferences>
//! ```
//!
//! The codec only moves bytes; atomic-rename durability and recovery are
//! the document engine's job.

use prefstore_common::{Error, Result, Value};
use quick_xml::events::{BytesDecl, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const ROOT_TAG: &str = "preferences";
const ITEM_TAG: &str = "item";

/// Tags of the scalar elements
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScalarTag {
    Null,
    Int,
    Double,
    Bool,
    String,
}

impl ScalarTag {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"null" => Some(Self::Null),
            b"int" => Some(Self::Int),
            b"double" => Some(Self::Double),
            b"bool" => Some(Self::Bool),
            b"string" => Some(Self::String),
            _ => None,
        }
    }

    fn parse(self, text: &str) -> Result<Value> {
        match self {
            Self::Null => Ok(Value::Null),
            Self::Int => text
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(Error::serialization),
            Self::Double => text
                .trim()
                .parse::<f64>()
                .map(Value::Double)
                .map_err(Error::serialization),
            Self::Bool => text
                .trim()
                .parse::<bool>()
                .map(Value::Bool)
                .map_err(Error::serialization),
            Self::String => Ok(Value::String(text.to_string())),
        }
    }
}

/// Tags of the homogeneous array elements
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArrayTag {
    Int,
    Double,
    Bool,
    String,
}

impl ArrayTag {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"intArray" => Some(Self::Int),
            b"doubleArray" => Some(Self::Double),
            b"boolArray" => Some(Self::Bool),
            b"stringArray" => Some(Self::String),
            _ => None,
        }
    }

    fn parse(self, items: Vec<String>) -> Result<Value> {
        match self {
            Self::Int => items
                .iter()
                .map(|s| s.trim().parse::<i64>().map_err(Error::serialization))
                .collect::<Result<Vec<_>>>()
                .map(Value::IntArray),
            Self::Double => items
                .iter()
                .map(|s| s.trim().parse::<f64>().map_err(Error::serialization))
                .collect::<Result<Vec<_>>>()
                .map(Value::DoubleArray),
            Self::Bool => items
                .iter()
                .map(|s| s.trim().parse::<bool>().map_err(Error::serialization))
                .collect::<Result<Vec<_>>>()
                .map(Value::BoolArray),
            Self::String => Ok(Value::StringArray(items)),
        }
    }
}

fn key_attribute(element: &BytesStart<'_>) -> Result<String> {
    let attr = element
        .try_get_attribute("key")
        .map_err(Error::serialization)?
        .ok_or_else(|| Error::serialization("element is missing the key attribute"))?;
    Ok(attr
        .unescape_value()
        .map_err(Error::serialization)?
        .into_owned())
}

/// Parse a settings document from `bytes`.
pub fn parse_document(bytes: &[u8]) -> Result<BTreeMap<String, Value>> {
    let text = std::str::from_utf8(bytes).map_err(Error::serialization)?;
    let mut reader = Reader::from_str(text);

    let mut settings = BTreeMap::new();
    // At most two levels deep: a scalar, or an array with its current item.
    let mut scalar: Option<(ScalarTag, String, String)> = None;
    let mut array: Option<(ArrayTag, String, Vec<String>)> = None;
    let mut item: Option<String> = None;

    loop {
        match reader.read_event().map_err(Error::serialization)? {
            Event::Decl(_) | Event::Comment(_) => {}
            Event::Start(e) => {
                let name = e.name();
                let name = name.as_ref();
                if name == ROOT_TAG.as_bytes() {
                    continue;
                }
                if name == ITEM_TAG.as_bytes() {
                    if array.is_none() {
                        return Err(Error::serialization("item element outside an array"));
                    }
                    item = Some(String::new());
                    continue;
                }
                if let Some(tag) = ScalarTag::from_name(name) {
                    scalar = Some((tag, key_attribute(&e)?, String::new()));
                    continue;
                }
                if let Some(tag) = ArrayTag::from_name(name) {
                    array = Some((tag, key_attribute(&e)?, Vec::new()));
                    continue;
                }
                return Err(Error::Serialization(format!(
                    "unknown element: {}",
                    String::from_utf8_lossy(name)
                )));
            }
            // Self-closing elements: an empty array, a null, or a bare item
            Event::Empty(e) => {
                let name = e.name();
                let name = name.as_ref();
                if name == ROOT_TAG.as_bytes() {
                    continue;
                }
                if name == ITEM_TAG.as_bytes() {
                    match array.as_mut() {
                        Some((_, _, items)) => items.push(String::new()),
                        None => {
                            return Err(Error::serialization("item element outside an array"));
                        }
                    }
                    continue;
                }
                if let Some(tag) = ScalarTag::from_name(name) {
                    settings.insert(key_attribute(&e)?, tag.parse("")?);
                    continue;
                }
                if let Some(tag) = ArrayTag::from_name(name) {
                    settings.insert(key_attribute(&e)?, tag.parse(Vec::new())?);
                    continue;
                }
                return Err(Error::Serialization(format!(
                    "unknown element: {}",
                    String::from_utf8_lossy(name)
                )));
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(Error::serialization)?;
                if let Some(acc) = item.as_mut() {
                    acc.push_str(&text);
                } else if let Some((_, _, acc)) = scalar.as_mut() {
                    acc.push_str(&text);
                }
                // Whitespace between elements is ignored.
            }
            Event::End(e) => {
                let name = e.name();
                let name = name.as_ref();
                if name == ROOT_TAG.as_bytes() {
                    continue;
                }
                if name == ITEM_TAG.as_bytes() {
                    let text = item
                        .take()
                        .ok_or_else(|| Error::serialization("unexpected item end tag"))?;
                    if let Some((_, _, items)) = array.as_mut() {
                        items.push(text);
                    }
                    continue;
                }
                if ScalarTag::from_name(name).is_some() {
                    let (tag, key, text) = scalar
                        .take()
                        .ok_or_else(|| Error::serialization("unexpected scalar end tag"))?;
                    settings.insert(key, tag.parse(&text)?);
                    continue;
                }
                if ArrayTag::from_name(name).is_some() {
                    let (tag, key, items) = array
                        .take()
                        .ok_or_else(|| Error::serialization("unexpected array end tag"))?;
                    settings.insert(key, tag.parse(items)?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(settings)
}

/// Serialize the settings map into document bytes.
pub fn render_document(settings: &BTreeMap<String, Value>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut writer = Writer::new_with_indent(&mut buf, b' ', 4);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    writer
        .create_element(ROOT_TAG)
        .with_attribute(("version", "1.0"))
        .write_inner_content(|w| {
            for (key, value) in settings {
                write_value(w, key, value)?;
            }
            Ok(())
        })?;

    buf.push(b'\n');
    Ok(buf)
}

fn write_value<W: Write>(writer: &mut Writer<W>, key: &str, value: &Value) -> std::io::Result<()> {
    match value {
        Value::Null => {
            writer
                .create_element("null")
                .with_attribute(("key", key))
                .write_empty()?;
        }
        Value::Int(v) => write_scalar(writer, "int", key, &v.to_string())?,
        Value::Double(v) => write_scalar(writer, "double", key, &v.to_string())?,
        Value::Bool(v) => write_scalar(writer, "bool", key, &v.to_string())?,
        Value::String(v) => write_scalar(writer, "string", key, v)?,
        Value::IntArray(items) => {
            let items: Vec<String> = items.iter().map(ToString::to_string).collect();
            write_array(writer, "intArray", key, &items)?;
        }
        Value::DoubleArray(items) => {
            let items: Vec<String> = items.iter().map(ToString::to_string).collect();
            write_array(writer, "doubleArray", key, &items)?;
        }
        Value::BoolArray(items) => {
            let items: Vec<String> = items.iter().map(ToString::to_string).collect();
            write_array(writer, "boolArray", key, &items)?;
        }
        Value::StringArray(items) => write_array(writer, "stringArray", key, items)?,
    }
    Ok(())
}

fn write_scalar<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    key: &str,
    text: &str,
) -> std::io::Result<()> {
    writer
        .create_element(tag)
        .with_attribute(("key", key))
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

fn write_array<W: Write, S: AsRef<str>>(
    writer: &mut Writer<W>,
    tag: &str,
    key: &str,
    items: &[S],
) -> std::io::Result<()> {
    let element = writer.create_element(tag).with_attribute(("key", key));
    if items.is_empty() {
        element.write_empty()?;
    } else {
        element.write_inner_content(|w| {
            for item in items {
                w.create_element(ITEM_TAG)
                    .write_text_content(BytesText::new(item.as_ref()))?;
            }
            Ok(())
        })?;
    }
    Ok(())
}

/// Read and parse the document at `path`.
pub fn read_document(path: &Path) -> Result<BTreeMap<String, Value>> {
    let bytes = std::fs::read(path)?;
    parse_document(&bytes)
}

/// Render and write the document to `path`, fsyncing the file.
pub fn write_document(path: &Path, settings: &BTreeMap<String, Value>) -> Result<()> {
    let bytes = render_document(settings)?;
    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    Ok(())
}
