//! XML envelope form.
//!
//! ```xml
//! <errorEnvelope>
//!   <id>req-1</id>
//!   <timestamp>2024-05-01T10:00:00.123Z</timestamp>
//!   <message>Order 42 not found</message>
//!   <errorCode>ORDER_NOT_FOUND</errorCode>
//!   <className>shop::OrderMissing</className>
//!   <extensions>
//!     <entry key="orderId"><number>42</number></entry>
//!   </extensions>
//! </errorEnvelope>
//! ```
//!
//! Extension values are typed elements (`null`, `bool`, `number`, `string`,
//! `array`, `object`) so that any JSON value survives the trip.

use crate::envelope::{ErrorEnvelope, WireEnvelope};
use crate::error::CodecError;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Number, Value};
use std::fmt::Display;

const ROOT: &str = "errorEnvelope";
const ENTRY: &str = "entry";
const KEY: &str = "key";
// Matches the nesting limit serde_json applies to JSON bodies.
const MAX_DEPTH: usize = 128;

fn xml_error(e: impl Display) -> CodecError {
    CodecError::Xml(e.to_string())
}

/// Write `envelope` as an XML document.
pub(crate) fn encode(envelope: &ErrorEnvelope) -> Result<Vec<u8>, CodecError> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;
    start(&mut writer, BytesStart::new(ROOT))?;

    leaf(&mut writer, "id", &envelope.id)?;
    leaf(&mut writer, "timestamp", &envelope.timestamp_string())?;
    leaf(&mut writer, "message", &envelope.message)?;
    leaf(&mut writer, "errorCode", &envelope.error_code)?;
    leaf(&mut writer, "className", &envelope.class_name)?;

    start(&mut writer, BytesStart::new("extensions"))?;
    write_entries(&mut writer, &envelope.extensions)?;
    end(&mut writer, "extensions")?;

    end(&mut writer, ROOT)?;
    Ok(writer.into_inner())
}

fn start(writer: &mut Writer<Vec<u8>>, element: BytesStart<'_>) -> Result<(), CodecError> {
    writer.write_event(Event::Start(element)).map_err(xml_error)
}

fn end(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<(), CodecError> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_error)
}

fn leaf(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<(), CodecError> {
    start(writer, BytesStart::new(name))?;
    if !text.is_empty() {
        writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_error)?;
    }
    end(writer, name)
}

fn write_entries(writer: &mut Writer<Vec<u8>>, map: &Map<String, Value>) -> Result<(), CodecError> {
    for (key, value) in map {
        start(writer, BytesStart::new(ENTRY).with_attributes([(KEY, key.as_str())]))?;
        write_value(writer, value)?;
        end(writer, ENTRY)?;
    }
    Ok(())
}

fn write_value(writer: &mut Writer<Vec<u8>>, value: &Value) -> Result<(), CodecError> {
    match value {
        Value::Null => writer
            .write_event(Event::Empty(BytesStart::new("null")))
            .map_err(xml_error),
        Value::Bool(b) => leaf(writer, "bool", if *b { "true" } else { "false" }),
        Value::Number(n) => leaf(writer, "number", &n.to_string()),
        Value::String(s) => leaf(writer, "string", s),
        Value::Array(items) => {
            start(writer, BytesStart::new("array"))?;
            for item in items {
                write_value(writer, item)?;
            }
            end(writer, "array")
        }
        Value::Object(map) => {
            start(writer, BytesStart::new("object"))?;
            write_entries(writer, map)?;
            end(writer, "object")
        }
    }
}

/// Parse an XML envelope document. Unknown elements make it "not an envelope".
pub(crate) fn decode(body: &[u8]) -> Result<ErrorEnvelope, CodecError> {
    let text = std::str::from_utf8(body).map_err(xml_error)?;
    let mut parser = Parser::new(text);

    match parser.next_structural()? {
        Event::Start(e) if e.name().as_ref() == ROOT.as_bytes() => {}
        other => return Err(unexpected(&other)),
    }

    let mut wire = WireEnvelope::default();
    loop {
        match parser.next_structural()? {
            Event::End(e) if e.name().as_ref() == ROOT.as_bytes() => break,
            Event::Start(e) => {
                let name = e.name();
                let name = name.as_ref();
                if name == b"extensions" {
                    wire.extensions = Some(parser.read_entries(name)?);
                } else {
                    let text = parser.read_text(name)?;
                    set_field(&mut wire, name, text)?;
                }
            }
            Event::Empty(e) => {
                let name = e.name();
                if name.as_ref() == b"extensions" {
                    wire.extensions = Some(Map::new());
                } else {
                    set_field(&mut wire, name.as_ref(), String::new())?;
                }
            }
            other => return Err(unexpected(&other)),
        }
    }

    Ok(wire.into())
}

fn set_field(wire: &mut WireEnvelope, name: &[u8], text: String) -> Result<(), CodecError> {
    let slot = match name {
        b"id" => &mut wire.id,
        b"timestamp" => &mut wire.timestamp,
        b"message" => &mut wire.message,
        b"errorCode" => &mut wire.error_code,
        b"className" => &mut wire.class_name,
        other => {
            return Err(CodecError::Xml(format!(
                "unknown element <{}>",
                String::from_utf8_lossy(other)
            )))
        }
    };
    *slot = Some(text);
    Ok(())
}

fn unexpected(event: &Event<'_>) -> CodecError {
    CodecError::Xml(format!("unexpected {:?}", event))
}

struct Parser<'a> {
    reader: Reader<&'a [u8]>,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            reader: Reader::from_str(text),
            depth: 0,
        }
    }

    fn read_event(&mut self) -> Result<Event<'a>, CodecError> {
        match self.reader.read_event().map_err(xml_error)? {
            Event::Eof => Err(CodecError::Xml("unexpected end of document".to_string())),
            event => Ok(event),
        }
    }

    // Skips prolog noise and formatting whitespace between elements.
    fn next_structural(&mut self) -> Result<Event<'a>, CodecError> {
        loop {
            let event = self.read_event()?;
            match &event {
                Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => continue,
                Event::Text(t) if t.iter().all(u8::is_ascii_whitespace) => continue,
                _ => return Ok(event),
            }
        }
    }

    // Text content up to the closing tag of `name`, whitespace kept.
    fn read_text(&mut self, name: &[u8]) -> Result<String, CodecError> {
        let mut text = String::new();
        loop {
            match self.read_event()? {
                Event::Text(t) => text.push_str(&t.unescape().map_err(xml_error)?),
                Event::CData(c) => {
                    text.push_str(std::str::from_utf8(&c.into_inner()).map_err(xml_error)?)
                }
                Event::Comment(_) | Event::PI(_) => {}
                Event::End(e) if e.name().as_ref() == name => return Ok(text),
                other => return Err(unexpected(&other)),
            }
        }
    }

    fn read_entries(&mut self, closing: &[u8]) -> Result<Map<String, Value>, CodecError> {
        let mut map = Map::new();
        loop {
            match self.next_structural()? {
                Event::End(e) if e.name().as_ref() == closing => return Ok(map),
                Event::Start(e) if e.name().as_ref() == ENTRY.as_bytes() => {
                    let key = e
                        .try_get_attribute(KEY)
                        .map_err(xml_error)?
                        .ok_or_else(|| CodecError::Xml("entry without key".to_string()))?
                        .unescape_value()
                        .map_err(xml_error)?
                        .into_owned();
                    let value_start = self.next_structural()?;
                    let value = self.read_value(value_start)?;
                    match self.next_structural()? {
                        Event::End(end) if end.name().as_ref() == ENTRY.as_bytes() => {}
                        other => return Err(unexpected(&other)),
                    }
                    map.insert(key, value);
                }
                other => return Err(unexpected(&other)),
            }
        }
    }

    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, CodecError>,
    ) -> Result<T, CodecError> {
        if self.depth >= MAX_DEPTH {
            return Err(CodecError::Xml("nesting too deep".to_string()));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn read_array(&mut self) -> Result<Vec<Value>, CodecError> {
        let mut items = Vec::new();
        loop {
            match self.next_structural()? {
                Event::End(end) if end.name().as_ref() == b"array" => return Ok(items),
                item => items.push(self.read_value(item)?),
            }
        }
    }

    fn read_value(&mut self, event: Event<'a>) -> Result<Value, CodecError> {
        match event {
            Event::Empty(e) => match e.name().as_ref() {
                b"null" => Ok(Value::Null),
                b"string" => Ok(Value::String(String::new())),
                b"array" => Ok(Value::Array(Vec::new())),
                b"object" => Ok(Value::Object(Map::new())),
                _ => Err(unexpected(&Event::Empty(e.clone()))),
            },
            Event::Start(e) => {
                let name = e.name();
                let name = name.as_ref();
                match name {
                    b"null" => {
                        self.read_text(name)?;
                        Ok(Value::Null)
                    }
                    b"bool" => match self.read_text(name)?.trim() {
                        "true" => Ok(Value::Bool(true)),
                        "false" => Ok(Value::Bool(false)),
                        other => Err(CodecError::Xml(format!("invalid bool '{other}'"))),
                    },
                    b"number" => {
                        let text = self.read_text(name)?;
                        text.trim()
                            .parse::<Number>()
                            .map(Value::Number)
                            .map_err(xml_error)
                    }
                    b"string" => self.read_text(name).map(Value::String),
                    b"array" => self.nested(|p| p.read_array().map(Value::Array)),
                    b"object" => self.nested(|p| p.read_entries(b"object").map(Value::Object)),
                    _ => Err(unexpected(&Event::Start(e.clone()))),
                }
            }
            other => Err(unexpected(&other)),
        }
    }
}
