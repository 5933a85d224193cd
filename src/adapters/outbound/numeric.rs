//! PostgreSQL NUMERIC binary codec.
//!
//! NUMERIC travels as base-10000 digit groups:
//! `ndigits i16 | weight i16 | sign u16 | dscale u16 | digits[ndigits] i16`.
//! Values are exchanged with callers as decimal strings so no precision is lost.

use bytes::{BufMut, BytesMut};
use std::error::Error;
use std::fmt::Write;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};

const SIGN_POSITIVE: u16 = 0x0000;
const SIGN_NEGATIVE: u16 = 0x4000;
const SIGN_NAN: u16 = 0xC000;
const SIGN_POS_INFINITY: u16 = 0xD000;
const SIGN_NEG_INFINITY: u16 = 0xF000;

/// A decimal string prepared for binding to a NUMERIC parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericText {
    digits: Vec<i16>,
    weight: i16,
    sign: u16,
    dscale: u16,
}

impl NumericText {
    /// Parse a plain decimal (`-12.50`, `7`, `.5`, `NaN`). Exponent notation
    /// is not accepted.
    pub fn parse(text: &str) -> Result<Self, String> {
        let s = text.trim();

        if s.eq_ignore_ascii_case("nan") {
            return Ok(Self {
                digits: Vec::new(),
                weight: 0,
                sign: SIGN_NAN,
                dscale: 0,
            });
        }

        let (negative, body) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };

        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(format!("invalid numeric value {:?}", text));
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid numeric value {:?}", text));
        }

        let dscale = u16::try_from(frac_part.len())
            .map_err(|_| format!("numeric scale too large in {:?}", text))?;

        let int_part = int_part.trim_start_matches('0');
        let mut int_digits = "0".repeat((4 - int_part.len() % 4) % 4);
        int_digits.push_str(int_part);
        let mut frac_digits = frac_part.to_string();
        frac_digits.push_str(&"0".repeat((4 - frac_part.len() % 4) % 4));

        let mut weight = (int_digits.len() / 4) as i64 - 1;
        let mut groups: Vec<i16> = int_digits
            .as_bytes()
            .chunks(4)
            .chain(frac_digits.as_bytes().chunks(4))
            .map(|chunk| chunk.iter().fold(0i16, |acc, b| acc * 10 + (b - b'0') as i16))
            .collect();

        let leading = groups.iter().take_while(|g| **g == 0).count();
        groups.drain(..leading);
        weight -= leading as i64;
        while groups.last() == Some(&0) {
            groups.pop();
        }
        if groups.is_empty() {
            weight = 0;
        }

        if groups.len() > i16::MAX as usize {
            return Err(format!("numeric value {:?} has too many digits", text));
        }
        let weight =
            i16::try_from(weight).map_err(|_| format!("numeric value {:?} out of range", text))?;

        Ok(Self {
            sign: if negative && !groups.is_empty() {
                SIGN_NEGATIVE
            } else {
                SIGN_POSITIVE
            },
            digits: groups,
            weight,
            dscale,
        })
    }
}

impl ToSql for NumericText {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        out.put_i16(self.digits.len() as i16);
        out.put_i16(self.weight);
        out.put_u16(self.sign);
        out.put_u16(self.dscale);
        for digit in &self.digits {
            out.put_i16(*digit);
        }
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }

    to_sql_checked!();
}

/// Render a binary NUMERIC value as a decimal string.
pub fn decode(raw: &[u8]) -> Result<String, String> {
    if raw.len() < 8 {
        return Err("numeric value too short".to_string());
    }

    let read_u16 = |at: usize| u16::from_be_bytes([raw[at], raw[at + 1]]);
    let ndigits = read_u16(0) as usize;
    let weight = read_u16(2) as i16 as i64;
    let sign = read_u16(4);
    let dscale = read_u16(6) as usize;

    if raw.len() != 8 + ndigits * 2 {
        return Err("numeric value has inconsistent length".to_string());
    }
    let digits: Vec<u16> = (0..ndigits).map(|i| read_u16(8 + i * 2)).collect();
    let digit_at = |i: i64| -> u16 {
        if i < 0 {
            0
        } else {
            digits.get(i as usize).copied().unwrap_or(0)
        }
    };

    let mut out = String::new();
    match sign {
        SIGN_NAN => return Ok("NaN".to_string()),
        SIGN_POS_INFINITY => return Ok("Infinity".to_string()),
        SIGN_NEG_INFINITY => return Ok("-Infinity".to_string()),
        SIGN_NEGATIVE => out.push('-'),
        SIGN_POSITIVE => {}
        other => return Err(format!("unknown numeric sign {:#06x}", other)),
    }

    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                let _ = write!(out, "{}", digit_at(i));
            } else {
                let _ = write!(out, "{:04}", digit_at(i));
            }
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while frac.len() < dscale {
            let _ = write!(frac, "{:04}", digit_at(i));
            i += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Ok(out)
}
