//! Canonical notation encoder.

use std::fmt::{self, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::SecondsFormat;

use crate::value::Value;

/// Encode a value into canonical notation bytes.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = String::new();
    encode_to(value, &mut out);
    out.into_bytes()
}

/// Append the canonical notation text of `value` to `out`.
pub fn encode_to(value: &Value, out: &mut String) {
    // fmt::Write for String is infallible.
    let _ = write_value(out, value);
}

/// Write the canonical notation text of `value` to any formatter.
///
/// Canonical choices: strings and map keys use single quotes, dates and URIs
/// double quotes, booleans are `true`/`false`, binary is base64.
pub fn write_value<W: Write + ?Sized>(out: &mut W, value: &Value) -> fmt::Result {
    match value {
        Value::Undefined => out.write_char('!'),
        Value::Boolean(true) => out.write_str("true"),
        Value::Boolean(false) => out.write_str("false"),
        Value::Integer(n) => write!(out, "i{n}"),
        Value::Real(r) => write_real(out, *r),
        Value::String(s) => write_string(out, s),
        Value::Uuid(u) => write!(out, "u{}", u.hyphenated()),
        Value::Date(d) => {
            out.write_char('d')?;
            write_quoted(out, &d.to_rfc3339_opts(SecondsFormat::AutoSi, true), '"')
        }
        Value::Uri(u) => {
            out.write_char('l')?;
            write_quoted(out, u, '"')
        }
        Value::Binary(bytes) => write!(out, "b64\"{}\"", STANDARD.encode(bytes)),
        Value::Array(items) => {
            out.write_char('[')?;
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.write_char(',')?;
                }
                write_value(out, item)?;
            }
            out.write_char(']')
        }
        Value::Map(map) => write_map_entries(out, map),
    }
}

/// Write borrowed `(key, value)` pairs as one map, in iteration order.
///
/// Lets callers encode a map they hold in pieces without assembling a
/// [`Map`](crate::Map) first. Duplicate keys are written as given.
pub fn write_map_entries<'a, W, I>(out: &mut W, entries: I) -> fmt::Result
where
    W: Write + ?Sized,
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    out.write_char('{')?;
    for (idx, (key, item)) in entries.into_iter().enumerate() {
        if idx > 0 {
            out.write_char(',')?;
        }
        write_string(out, key)?;
        out.write_char(':')?;
        write_value(out, item)?;
    }
    out.write_char('}')
}

/// Write `s` as a single-quoted notation string.
pub fn write_string<W: Write + ?Sized>(out: &mut W, s: &str) -> fmt::Result {
    write_quoted(out, s, '\'')
}

fn write_real<W: Write + ?Sized>(out: &mut W, r: f64) -> fmt::Result {
    if r.is_nan() {
        out.write_str("rnan")
    } else if r.is_infinite() {
        out.write_str(if r > 0.0 { "rinf" } else { "r-inf" })
    } else {
        // `Debug` is the shortest representation that parses back to the same bits.
        write!(out, "r{r:?}")
    }
}

fn write_quoted<W: Write + ?Sized>(out: &mut W, s: &str, delim: char) -> fmt::Result {
    out.write_char(delim)?;
    for ch in s.chars() {
        match ch {
            '\\' => out.write_str("\\\\")?,
            '\n' => out.write_str("\\n")?,
            '\r' => out.write_str("\\r")?,
            '\t' => out.write_str("\\t")?,
            c if c == delim => {
                out.write_char('\\')?;
                out.write_char(c)?;
            }
            c if c.is_ascii_control() => write!(out, "\\x{:02x}", c as u32)?,
            c => out.write_char(c)?,
        }
    }
    out.write_char(delim)
}
