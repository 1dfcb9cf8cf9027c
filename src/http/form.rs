//! `application/x-www-form-urlencoded` and cookie header decoding.
//!
//! Bracketed keys nest: `a[b]=1` gives `{"a": {"b": "1"}}` and `a[]=1&a[]=2`
//! gives `{"a": ["1", "2"]}`. Maps whose keys are exactly `0..n` become arrays.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use url::form_urlencoded;

/// Decode a query string or url-encoded body.
pub fn parse_form(input: &str) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in form_urlencoded::parse(input.as_bytes()) {
        let (base, path) = split_key(&key);
        if base.is_empty() {
            continue;
        }
        insert(&mut out, base, &path, Value::String(value.into_owned()));
    }

    out.into_iter().map(|(k, v)| (k, listify(v))).collect()
}

/// Decode a `Cookie` header. The first occurrence of a name wins.
pub fn parse_cookies(header: &str) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    for pair in header.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some((name, value)) = form_urlencoded::parse(pair.as_bytes()).next() {
            if !name.is_empty() {
                cookies.entry(name.into_owned()).or_insert_with(|| value.into_owned());
            }
        }
    }
    cookies
}

fn split_key(key: &str) -> (String, Vec<String>) {
    let Some(open) = key.find('[') else {
        return (key.to_string(), Vec::new());
    };

    let mut path = Vec::new();
    let mut rest = &key[open..];
    while let Some(stripped) = rest.strip_prefix('[') {
        let Some(close) = stripped.find(']') else {
            // Unbalanced brackets keep the whole key literal.
            return (key.to_string(), Vec::new());
        };
        path.push(stripped[..close].to_string());
        rest = &stripped[close + 1..];
    }

    (key[..open].to_string(), path)
}

fn insert(map: &mut Map<String, Value>, key: String, path: &[String], value: Value) {
    let Some((next, rest)) = path.split_first() else {
        map.insert(key, value);
        return;
    };

    let entry = map.entry(key).or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(child) = entry {
        let key = if next.is_empty() {
            next_index(child).to_string()
        } else {
            next.clone()
        };
        insert(child, key, rest, value);
    }
}

fn next_index(map: &Map<String, Value>) -> u64 {
    map.keys()
        .filter_map(|k| k.parse::<u64>().ok())
        .max()
        .map_or(0, |max| max + 1)
}

fn listify(value: Value) -> Value {
    let Value::Object(map) = value else {
        return value;
    };

    let mut indexed: Vec<(u64, Value)> = Vec::with_capacity(map.len());
    let mut sequential = true;
    for (k, v) in &map {
        match k.parse::<u64>() {
            Ok(i) if k == &i.to_string() => indexed.push((i, v.clone())),
            _ => {
                sequential = false;
                break;
            }
        }
    }
    indexed.sort_by_key(|(i, _)| *i);
    sequential = sequential && indexed.iter().enumerate().all(|(pos, (i, _))| *i == pos as u64);

    if sequential && !indexed.is_empty() {
        Value::Array(indexed.into_iter().map(|(_, v)| listify(v)).collect())
    } else {
        Value::Object(map.into_iter().map(|(k, v)| (k, listify(v))).collect())
    }
}
