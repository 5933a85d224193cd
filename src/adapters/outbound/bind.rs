//! Bind value coercion.
//!
//! Callers only send strings and numbers, while the extended query protocol
//! needs every parameter encoded in the binary format of its declared type.
//! The statement is prepared first, then each value is converted to the
//! parameter type the server inferred for it.

use crate::adapters::outbound::numeric::NumericText;
use crate::domain::entities::BindValue;
use crate::domain::errors::{GatewayError, GatewayResult};
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use std::error::Error;
use tokio_postgres::types::{to_sql_checked, IsNull, Kind, ToSql, Type};

pub type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// Convert caller values into typed parameters for a prepared statement.
pub fn bind_params(types: &[Type], values: &[BindValue]) -> GatewayResult<Vec<BoxedParam>> {
    if types.len() != values.len() {
        return Err(GatewayError::Query(format!(
            "statement expects {} parameters but {} values were supplied",
            types.len(),
            values.len()
        )));
    }

    types
        .iter()
        .zip(values)
        .enumerate()
        .map(|(i, (ty, value))| {
            coerce(ty, value).map_err(|reason| {
                GatewayError::Query(format!("cannot bind parameter ${}: {}", i + 1, reason))
            })
        })
        .collect()
}

fn boxed<T: ToSql + Sync + Send + 'static>(value: T) -> BoxedParam {
    Box::new(value)
}

fn coerce(ty: &Type, value: &BindValue) -> Result<BoxedParam, String> {
    match *ty {
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            Ok(boxed(value.as_text()))
        }
        Type::BOOL => to_bool(value).map(boxed),
        Type::INT2 => to_integer(value)
            .and_then(|i| i16::try_from(i).map_err(|_| out_of_range(ty)))
            .map(boxed),
        Type::INT4 => to_integer(value)
            .and_then(|i| i32::try_from(i).map_err(|_| out_of_range(ty)))
            .map(boxed),
        Type::INT8 => to_integer(value).map(boxed),
        Type::OID => to_integer(value)
            .and_then(|i| u32::try_from(i).map_err(|_| out_of_range(ty)))
            .map(boxed),
        Type::FLOAT4 => to_float(value).map(|f| boxed(f as f32)),
        Type::FLOAT8 => to_float(value).map(boxed),
        Type::NUMERIC => NumericText::parse(&value.as_text()).map(boxed),
        Type::JSON | Type::JSONB => to_json(value).map(boxed),
        Type::UUID => uuid::Uuid::parse_str(text_only(value, ty)?.trim())
            .map(boxed)
            .map_err(|e| e.to_string()),
        Type::DATE => NaiveDate::parse_from_str(text_only(value, ty)?.trim(), "%Y-%m-%d")
            .map(boxed)
            .map_err(|e| e.to_string()),
        Type::TIME => parse_time(text_only(value, ty)?).map(boxed),
        Type::TIMESTAMP => parse_timestamp(text_only(value, ty)?).map(boxed),
        Type::TIMESTAMPTZ => parse_timestamptz(text_only(value, ty)?).map(boxed),
        _ => match ty.kind() {
            Kind::Enum(_) => Ok(boxed(Label(value.as_text()))),
            Kind::Domain(base) => coerce(base, value).map(|inner| {
                boxed(AsBase {
                    base: base.clone(),
                    inner,
                })
            }),
            Kind::Array(elem) => coerce_array(elem, value).map(boxed),
            // citext, ltree and friends share the text wire format.
            _ if <String as ToSql>::accepts(ty) => Ok(boxed(value.as_text())),
            _ => Err(format!("unsupported parameter type {}", ty)),
        },
    }
}

/// A value whose binary form is its UTF-8 text, such as an enum label.
#[derive(Debug)]
struct Label(String);

impl ToSql for Label {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        out.put_slice(self.0.as_bytes());
        Ok(IsNull::No)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// A domain-typed parameter, encoded as its base type.
#[derive(Debug)]
struct AsBase {
    base: Type,
    inner: BoxedParam,
}

impl ToSql for AsBase {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        self.inner.to_sql_checked(&self.base, out)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// A one-dimensional array parameter with already coerced elements.
#[derive(Debug)]
struct ArrayParam {
    elem: Type,
    items: Vec<Option<BoxedParam>>,
}

impl ToSql for ArrayParam {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        let dims = if self.items.is_empty() { 0 } else { 1 };
        out.put_i32(dims);
        out.put_i32(self.items.iter().any(Option::is_none) as i32);
        out.put_u32(self.elem.oid());
        if dims == 1 {
            out.put_i32(i32::try_from(self.items.len())?);
            out.put_i32(1);
        }

        for item in &self.items {
            let item = match item {
                Some(item) => item,
                None => {
                    out.put_i32(-1);
                    continue;
                }
            };
            let mut encoded = BytesMut::new();
            match item.to_sql_checked(&self.elem, &mut encoded)? {
                IsNull::Yes => out.put_i32(-1),
                IsNull::No => {
                    out.put_i32(i32::try_from(encoded.len())?);
                    out.put_slice(&encoded);
                }
            }
        }
        Ok(IsNull::No)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Array parameters arrive as a one-dimensional array literal such as
/// `{1,2,"a b",NULL}`.
fn coerce_array(elem: &Type, value: &BindValue) -> Result<ArrayParam, String> {
    let literal = match value {
        BindValue::Text(s) => s,
        _ => return Err(format!("expected an array literal for type {}[]", elem)),
    };

    let items = parse_array_literal(literal)?
        .into_iter()
        .map(|item| match item {
            Some(text) => coerce(elem, &BindValue::Text(text)).map(Some),
            None => Ok(None),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ArrayParam {
        elem: elem.clone(),
        items,
    })
}

fn parse_array_literal(literal: &str) -> Result<Vec<Option<String>>, String> {
    let inner = literal
        .trim()
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(|| format!("invalid array literal {:?}", literal))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut items = Vec::new();
    let mut chars = inner.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut text = String::new();
        let quoted = chars.next_if_eq(&'"').is_some();
        if quoted {
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some(c) => text.push(c),
                        None => return Err(format!("unterminated array literal {:?}", literal)),
                    },
                    Some(c) => text.push(c),
                    None => return Err(format!("unterminated array literal {:?}", literal)),
                }
            }
            while chars.next_if(|c| c.is_whitespace()).is_some() {}
        } else {
            while let Some(c) = chars.next_if(|c| *c != ',') {
                match c {
                    '{' | '}' => {
                        return Err("multidimensional arrays are not supported".to_string())
                    }
                    '"' => return Err(format!("invalid array literal {:?}", literal)),
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            text.push(escaped);
                        }
                    }
                    c => text.push(c),
                }
            }
            let trimmed = text.trim_end().len();
            text.truncate(trimmed);
        }

        if !quoted && text.eq_ignore_ascii_case("NULL") {
            items.push(None);
        } else {
            items.push(Some(text));
        }

        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(_) => return Err(format!("invalid array literal {:?}", literal)),
        }
    }
    Ok(items)
}

fn out_of_range(ty: &Type) -> String {
    format!("value out of range for type {}", ty)
}

fn text_only<'a>(value: &'a BindValue, ty: &Type) -> Result<&'a str, String> {
    match value {
        BindValue::Text(s) => Ok(s),
        _ => Err(format!("expected a string for type {}", ty)),
    }
}

fn to_bool(value: &BindValue) -> Result<bool, String> {
    match value {
        BindValue::Integer(i) => Ok(*i != 0),
        BindValue::Float(_) => Err("expected a boolean".to_string()),
        BindValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "y" | "yes" | "on" | "1" => Ok(true),
            "f" | "false" | "n" | "no" | "off" | "0" => Ok(false),
            other => Err(format!("invalid boolean {:?}", other)),
        },
    }
}

fn to_integer(value: &BindValue) -> Result<i64, String> {
    match value {
        BindValue::Integer(i) => Ok(*i),
        BindValue::Float(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => Ok(*f as i64),
        BindValue::Float(f) => Err(format!("{} is not an integer", f)),
        BindValue::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| format!("invalid integer {:?}", s)),
    }
}

fn to_float(value: &BindValue) -> Result<f64, String> {
    match value {
        BindValue::Integer(i) => Ok(*i as f64),
        BindValue::Float(f) => Ok(*f),
        BindValue::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| format!("invalid number {:?}", s)),
    }
}

/// Strings that hold JSON documents are bound as that document; any other
/// string is bound as a JSON string.
fn to_json(value: &BindValue) -> Result<Value, String> {
    match value {
        BindValue::Integer(i) => Ok(Value::from(*i)),
        BindValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| format!("{} cannot be represented in JSON", f)),
        BindValue::Text(s) => Ok(serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))),
    }
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f").map_err(|e| e.to_string())
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, String> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::MIN))
        })
        .map_err(|e| e.to_string())
}

/// RFC 3339 input keeps its offset; input without one is taken as UTC.
fn parse_timestamptz(s: &str) -> Result<DateTime<Utc>, String> {
    match DateTime::parse_from_rfc3339(s.trim()) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(_) => parse_timestamp(s).map(|naive| naive.and_utc()),
    }
}
