//! XML-RPC documents: `methodCall` in, `methodResponse` out.

use std::collections::BTreeMap;
use std::fmt::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;

use crate::error::{Error, Result};

/// Deepest array/struct nesting accepted in a request.
const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Boolean(bool),
    String(String),
    Double(f64),
    DateTime(String),
    Base64(Vec<u8>),
    Nil,
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
}

impl Value {
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Converts anything serde can describe. Objects become structs and `null` becomes nil.
    pub fn from_serialize<T: serde::Serialize>(value: &T) -> Result<Self> {
        let json = serde_json::to_value(value)
            .map_err(|e| Error::BadRequest(format!("cannot encode response: {e}")))?;
        Ok(Self::from(json))
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Self::Nil,
            Json::Bool(b) => Self::Boolean(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Double(n.as_f64().unwrap_or_default()),
            },
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Json::Object(members) => Self::Struct(
                members
                    .into_iter()
                    .map(|(name, value)| (name, Self::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Nil, Into::into)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub name: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open(String),
    Close(String),
    Text(String),
}

fn malformed(message: impl std::fmt::Display) -> Error {
    Error::BadRequest(format!("malformed XML-RPC request: {message}"))
}

fn tokenize(xml: &str) -> Result<Vec<Token>> {
    let mut reader = Reader::from_str(xml);
    let mut tokens = Vec::new();

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => {
                tokens.push(Token::Open(String::from_utf8_lossy(e.name().as_ref()).into_owned()));
            }
            Event::End(e) => {
                tokens.push(Token::Close(String::from_utf8_lossy(e.name().as_ref()).into_owned()));
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                tokens.push(Token::Open(name.clone()));
                tokens.push(Token::Close(name));
            }
            Event::Text(e) => {
                tokens.push(Token::Text(e.unescape().map_err(malformed)?.into_owned()));
            }
            Event::CData(e) => {
                tokens.push(Token::Text(String::from_utf8_lossy(&e.into_inner()).into_owned()));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn skip_whitespace(&mut self) {
        while let Some(Token::Text(text)) = self.tokens.get(self.pos) {
            if !text.trim().is_empty() {
                break;
            }
            self.pos += 1;
        }
    }

    fn peek_open(&mut self, name: &str) -> bool {
        self.skip_whitespace();
        matches!(self.tokens.get(self.pos), Some(Token::Open(n)) if n == name)
    }

    fn expect_open(&mut self, name: &str) -> Result<()> {
        if !self.peek_open(name) {
            return Err(malformed(format!("expected <{name}>")));
        }
        self.pos += 1;
        Ok(())
    }

    fn expect_close(&mut self, name: &str) -> Result<()> {
        self.skip_whitespace();
        match self.tokens.get(self.pos) {
            Some(Token::Close(n)) if n == name => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(malformed(format!("expected </{name}>"))),
        }
    }

    /// Concatenated text up to the next tag.
    fn text(&mut self) -> String {
        let mut text = String::new();
        while let Some(Token::Text(t)) = self.tokens.get(self.pos) {
            text.push_str(t);
            self.pos += 1;
        }
        text
    }

    fn text_element(&mut self, name: &str) -> Result<String> {
        let text = self.text();
        self.expect_close(name)?;
        Ok(text)
    }

    fn method_call(&mut self) -> Result<MethodCall> {
        self.expect_open("methodCall")?;
        self.expect_open("methodName")?;
        let name = self.text_element("methodName")?.trim().to_string();
        if name.is_empty() {
            return Err(malformed("empty method name"));
        }

        let mut params = Vec::new();
        if self.peek_open("params") {
            self.pos += 1;
            while self.peek_open("param") {
                self.pos += 1;
                params.push(self.value(0)?);
                self.expect_close("param")?;
            }
            self.expect_close("params")?;
        }

        self.expect_close("methodCall")?;
        Ok(MethodCall { name, params })
    }

    fn value(&mut self, depth: usize) -> Result<Value> {
        if depth >= MAX_NESTING {
            return Err(malformed(format!("values nested deeper than {MAX_NESTING}")));
        }
        self.expect_open("value")?;

        // A value without a type element is a string.
        let text = self.text();
        if let Some(Token::Close(n)) = self.tokens.get(self.pos) {
            if n == "value" {
                self.pos += 1;
                return Ok(Value::String(text));
            }
        }
        if !text.trim().is_empty() {
            return Err(malformed("text mixed with a typed value"));
        }

        let kind = match self.tokens.get(self.pos) {
            Some(Token::Open(kind)) => kind.clone(),
            _ => return Err(malformed("expected a value type")),
        };
        self.pos += 1;

        let value = match kind.as_str() {
            "int" | "i4" | "i8" => {
                let raw = self.text_element(&kind)?;
                let parsed = raw.trim().parse::<i64>();
                Value::Int(parsed.map_err(|_| malformed(format!("bad integer {raw:?}")))?)
            }
            "boolean" => match self.text_element(&kind)?.trim() {
                "1" | "true" => Value::Boolean(true),
                "0" | "false" => Value::Boolean(false),
                other => return Err(malformed(format!("bad boolean {other:?}"))),
            },
            "string" => Value::String(self.text_element(&kind)?),
            "double" => {
                let raw = self.text_element(&kind)?;
                let parsed = raw.trim().parse::<f64>();
                Value::Double(parsed.map_err(|_| malformed(format!("bad double {raw:?}")))?)
            }
            "dateTime.iso8601" => Value::DateTime(self.text_element(&kind)?.trim().to_string()),
            "base64" => {
                let raw: String = self.text_element(&kind)?.split_whitespace().collect();
                Value::Base64(STANDARD.decode(raw).map_err(malformed)?)
            }
            "nil" => {
                self.expect_close(&kind)?;
                Value::Nil
            }
            "array" => {
                self.expect_open("data")?;
                let mut items = Vec::new();
                while self.peek_open("value") {
                    items.push(self.value(depth + 1)?);
                }
                self.expect_close("data")?;
                self.expect_close(&kind)?;
                Value::Array(items)
            }
            "struct" => {
                let mut members = BTreeMap::new();
                while self.peek_open("member") {
                    self.pos += 1;
                    self.expect_open("name")?;
                    let name = self.text_element("name")?;
                    let value = self.value(depth + 1)?;
                    self.expect_close("member")?;
                    members.insert(name, value);
                }
                self.expect_close(&kind)?;
                Value::Struct(members)
            }
            other => return Err(malformed(format!("unknown type <{other}>"))),
        };

        self.expect_close("value")?;
        Ok(value)
    }
}

pub fn parse_method_call(xml: &str) -> Result<MethodCall> {
    let mut parser = Parser {
        tokens: tokenize(xml)?,
        pos: 0,
    };
    parser.method_call()
}

#[must_use]
pub fn method_response(value: &Value) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodResponse><params><param>");
    write_value(&mut out, value);
    out.push_str("</param></params></methodResponse>\n");
    out
}

#[must_use]
pub fn fault_response(code: i32, message: &str) -> String {
    let fault = Value::Struct(BTreeMap::from([
        ("faultCode".to_string(), Value::from(code)),
        ("faultString".to_string(), Value::from(message)),
    ]));

    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodResponse><fault>");
    write_value(&mut out, &fault);
    out.push_str("</fault></methodResponse>\n");
    out
}

fn write_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(i) if i32::try_from(*i).is_ok() => {
            let _ = write!(out, "<int>{i}</int>");
        }
        Value::Int(i) => {
            let _ = write!(out, "<i8>{i}</i8>");
        }
        Value::Boolean(b) => {
            let _ = write!(out, "<boolean>{}</boolean>", u8::from(*b));
        }
        Value::String(s) => {
            let _ = write!(out, "<string>{}</string>", escape(s.as_str()));
        }
        Value::Double(d) => {
            let _ = write!(out, "<double>{d:?}</double>");
        }
        Value::DateTime(d) => {
            let _ = write!(out, "<dateTime.iso8601>{}</dateTime.iso8601>", escape(d.as_str()));
        }
        Value::Base64(bytes) => {
            let _ = write!(out, "<base64>{}</base64>", STANDARD.encode(bytes));
        }
        Value::Nil => out.push_str("<nil/>"),
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                write_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                let _ = write!(out, "<member><name>{}</name>", escape(name.as_str()));
                write_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }
    out.push_str("</value>");
}
