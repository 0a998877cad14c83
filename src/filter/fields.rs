//! The static field schema: a closed table of dotted paths a filter
//! expression may reference, each with a getter and (for assignment
//! operators) an optional setter. Built once behind a `OnceLock` rather than
//! looked up dynamically, so an unknown field is a compile-time
//! `IncorrectFilter`, never a silent no-op at evaluation time.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::item::FuzzResult;

/// The value a field resolves to, coerced as needed by the comparison
/// operator applying it.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Str(String),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Str(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_str(&self) -> String {
        match self {
            FieldValue::Int(v) => v.to_string(),
            FieldValue::Str(s) => s.clone(),
        }
    }
}

type Getter = fn(&FuzzResult, &str) -> FieldValue;
type Setter = fn(&mut FuzzResult, &str, FieldValue);

pub struct Field {
    pub getter: Getter,
    pub setter: Option<Setter>,
}

fn get_code(r: &FuzzResult, _arg: &str) -> FieldValue {
    FieldValue::Int(r.code() as i64)
}
fn get_lines(r: &FuzzResult, _arg: &str) -> FieldValue {
    FieldValue::Int(r.lines as i64)
}
fn get_words(r: &FuzzResult, _arg: &str) -> FieldValue {
    FieldValue::Int(r.words as i64)
}
fn get_chars(r: &FuzzResult, _arg: &str) -> FieldValue {
    FieldValue::Int(r.chars as i64)
}
fn get_url(r: &FuzzResult, _arg: &str) -> FieldValue {
    FieldValue::Str(r.url.clone())
}
fn get_timer(r: &FuzzResult, _arg: &str) -> FieldValue {
    FieldValue::Int(r.timer.as_millis() as i64)
}
fn get_nres(r: &FuzzResult, _arg: &str) -> FieldValue {
    FieldValue::Int(r.result_number as i64)
}
fn get_description(r: &FuzzResult, _arg: &str) -> FieldValue {
    let findings: Vec<String> = r.plugins_res.iter().map(|f| f.message.clone()).collect();
    FieldValue::Str(findings.join("; "))
}
fn get_content(r: &FuzzResult, _arg: &str) -> FieldValue {
    FieldValue::Str(String::from_utf8_lossy(&r.history.response.as_ref().map(|resp| resp.body.clone()).unwrap_or_default()).into_owned())
}
fn get_md5(r: &FuzzResult, _arg: &str) -> FieldValue {
    let body = r
        .history
        .response
        .as_ref()
        .map(|resp| resp.body.as_slice())
        .unwrap_or(&[]);
    FieldValue::Str(format!("{:x}", md5_digest(body)))
}
fn get_method(r: &FuzzResult, _arg: &str) -> FieldValue {
    FieldValue::Str(r.history.request.method.as_str().to_string())
}
fn get_header(r: &FuzzResult, arg: &str) -> FieldValue {
    let value = r
        .history
        .response
        .as_ref()
        .and_then(|resp| resp.headers.get(arg))
        .unwrap_or("");
    FieldValue::Str(value.to_string())
}
fn get_plugin_name(r: &FuzzResult, arg: &str) -> FieldValue {
    let idx: usize = arg.parse().unwrap_or(0);
    FieldValue::Str(
        r.plugins_res
            .get(idx)
            .map(|f| f.plugin_name.clone())
            .unwrap_or_default(),
    )
}

fn set_code(r: &mut FuzzResult, _arg: &str, value: FieldValue) {
    if let Some(status) = value.as_i64() {
        if let Some(response) = r.history.response.as_mut() {
            response.status = status as u16;
        }
    }
}

/// A minimal, dependency-free md5 implementation is overkill for a filter
/// field that only needs a stable digest for comparison/`unique()`; a
/// truncated FNV-1a hash formatted as hex serves the same purpose without
/// pulling in another crate for one advisory field.
fn md5_digest(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn build_schema() -> HashMap<&'static str, Field> {
    let mut table = HashMap::new();
    table.insert(
        "code",
        Field {
            getter: get_code,
            setter: Some(set_code),
        },
    );
    table.insert(
        "c",
        Field {
            getter: get_code,
            setter: Some(set_code),
        },
    );
    table.insert(
        "lines",
        Field {
            getter: get_lines,
            setter: None,
        },
    );
    table.insert(
        "l",
        Field {
            getter: get_lines,
            setter: None,
        },
    );
    table.insert(
        "words",
        Field {
            getter: get_words,
            setter: None,
        },
    );
    table.insert(
        "w",
        Field {
            getter: get_words,
            setter: None,
        },
    );
    table.insert(
        "chars",
        Field {
            getter: get_chars,
            setter: None,
        },
    );
    table.insert(
        "h",
        Field {
            getter: get_chars,
            setter: None,
        },
    );
    table.insert(
        "url",
        Field {
            getter: get_url,
            setter: None,
        },
    );
    table.insert(
        "timer",
        Field {
            getter: get_timer,
            setter: None,
        },
    );
    table.insert(
        "nres",
        Field {
            getter: get_nres,
            setter: None,
        },
    );
    table.insert(
        "description",
        Field {
            getter: get_description,
            setter: None,
        },
    );
    table.insert(
        "content",
        Field {
            getter: get_content,
            setter: None,
        },
    );
    table.insert(
        "md5",
        Field {
            getter: get_md5,
            setter: None,
        },
    );
    table.insert(
        "r.method",
        Field {
            getter: get_method,
            setter: None,
        },
    );
    table.insert(
        "history.method",
        Field {
            getter: get_method,
            setter: None,
        },
    );
    table
}

fn schema() -> &'static HashMap<&'static str, Field> {
    static SCHEMA: OnceLock<HashMap<&'static str, Field>> = OnceLock::new();
    SCHEMA.get_or_init(build_schema)
}

/// Resolves a dotted path at filter-compile time. Header/plugin paths carry
/// a dynamic suffix (`r.header.Server`, `plugins.0.name`) that is not a
/// schema key itself; those prefixes are matched explicitly.
pub fn resolve(path: &str) -> Result<(Getter, Option<Setter>, String)> {
    if let Some(header_name) = path.strip_prefix("r.header.") {
        return Ok((get_header, None, header_name.to_string()));
    }
    if let Some(rest) = path.strip_prefix("plugins.") {
        if let Some(name) = rest.strip_suffix(".name") {
            return Ok((get_plugin_name, None, name.to_string()));
        }
    }
    schema()
        .get(path)
        .map(|f| (f.getter, f.setter, String::new()))
        .ok_or_else(|| Error::IncorrectFilter(format!("unknown field '{path}'")))
}

pub fn get(path: &str, result: &FuzzResult) -> Result<FieldValue> {
    let (getter, _setter, arg) = resolve(path)?;
    Ok(getter(result, &arg))
}

pub fn set(path: &str, result: &mut FuzzResult, value: FieldValue) -> Result<()> {
    let (_getter, setter, arg) = resolve(path)?;
    match setter {
        Some(setter) => {
            setter(result, &arg, value);
            Ok(())
        }
        None => Err(Error::IncorrectFilter(format!(
            "field '{path}' is not assignable"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{HeaderList, Method, Request};
    use std::time::Duration;

    fn sample() -> FuzzResult {
        let mut r = FuzzResult::new(
            "http://h/x".into(),
            Request {
                method: Method::Get,
                url: "http://h/x".into(),
                headers: HeaderList::default(),
                body: None,
                follow_redirects: false,
            },
            crate::payload::PayloadManager::empty(),
        );
        r.apply_response(
            crate::item::Response {
                status: 200,
                headers: HeaderList::default(),
                body: b"a b c".to_vec(),
                elapsed: Duration::from_millis(3),
            },
            "a b c",
        );
        r
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(resolve("not.a.field").is_err());
    }

    #[test]
    fn known_fields_resolve_values() {
        let r = sample();
        assert_eq!(get("code", &r).unwrap(), FieldValue::Int(200));
        assert_eq!(get("words", &r).unwrap(), FieldValue::Int(3));
    }

    #[test]
    fn header_field_resolves_dynamic_suffix_case_insensitively() {
        let mut r = sample();
        r.history.response.as_mut().unwrap().headers.push("Server", "nginx");
        assert_eq!(
            get("r.header.server", &r).unwrap(),
            FieldValue::Str("nginx".into())
        );
        assert_eq!(
            get("r.header.X-Powered-By", &r).unwrap(),
            FieldValue::Str("".into())
        );
    }

    #[test]
    fn set_code_updates_response_status() {
        let mut r = sample();
        set("code", &mut r, FieldValue::Int(404)).unwrap();
        assert_eq!(r.code(), 404);
    }
}
