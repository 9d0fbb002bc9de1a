//! Query-string encoding for request models.
//!
//! A request model is any `Serialize` struct. Null fields are skipped, and
//! fields named `min<X>` / `max<X>` (prefix matched case-insensitively) are
//! range bounds: when both bounds are set they collapse into a single
//! `<X>=min-max` parameter, and when only one is set the bound is dropped.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{LoaderError, Result};

/// Encodes `request` as `key=value` pairs joined by `&`, without a leading `?`.
pub fn build_query<Q: Serialize + ?Sized>(request: &Q) -> Result<String> {
    let fields = match serde_json::to_value(request) {
        Ok(Value::Object(fields)) => fields,
        Ok(Value::Null) => Map::new(),
        Ok(other) => {
            return Err(LoaderError::Decode(format!(
                "query request must serialize to an object, got {other}"
            )))
        }
        Err(err) => {
            return Err(LoaderError::Decode(format!(
                "could not encode query request: {err}"
            )))
        }
    };

    let mut pairs: Vec<(String, String)> = Vec::with_capacity(fields.len());
    let mut emitted_ranges: Vec<String> = Vec::new();

    for (key, value) in &fields {
        if value.is_null() {
            continue;
        }

        if let Some((_, suffix)) = split_range_bound(key) {
            let folded = suffix.to_ascii_lowercase();
            if emitted_ranges.contains(&folded) {
                continue;
            }
            let min = find_bound(&fields, "min", suffix);
            let max = find_bound(&fields, "max", suffix);
            if let (Some(min), Some(max)) = (min, max) {
                pairs.push((
                    suffix.to_owned(),
                    format!("{}-{}", scalar_text(min), scalar_text(max)),
                ));
                emitted_ranges.push(folded);
            }
            continue;
        }

        match value {
            Value::Array(items) => {
                for item in items.iter().filter(|item| !item.is_null()) {
                    pairs.push((key.clone(), scalar_text(item)));
                }
            }
            other => pairs.push((key.clone(), scalar_text(other))),
        }
    }

    Ok(pairs
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&"))
}

/// Appends the encoded query to `path`, adding `?` only when needed.
pub fn with_query<Q: Serialize + ?Sized>(path: &str, request: &Q) -> Result<String> {
    let query = build_query(request)?;
    if query.is_empty() {
        return Ok(path.to_owned());
    }
    let separator = if path.contains('?') { '&' } else { '?' };
    Ok(format!("{path}{separator}{query}"))
}

fn split_range_bound(key: &str) -> Option<(&str, &str)> {
    let prefix = key.get(..3)?;
    let suffix = &key[3..];
    if suffix.is_empty() {
        return None;
    }
    if prefix.eq_ignore_ascii_case("min") || prefix.eq_ignore_ascii_case("max") {
        Some((prefix, suffix))
    } else {
        None
    }
}

fn find_bound<'a>(fields: &'a Map<String, Value>, bound: &str, suffix: &str) -> Option<&'a Value> {
    fields.iter().find_map(|(key, value)| {
        let (prefix, other_suffix) = split_range_bound(key)?;
        (prefix.eq_ignore_ascii_case(bound)
            && other_suffix.eq_ignore_ascii_case(suffix)
            && !value.is_null())
        .then_some(value)
    })
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Null => String::new(),
        nested => nested.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::{build_query, with_query};

    #[derive(Default, Serialize)]
    #[serde(rename_all = "PascalCase")]
    struct Search {
        id: Option<i64>,
        min_year: Option<i32>,
        max_year: Option<i32>,
        min_rating: Option<f64>,
        max_rating: Option<f64>,
        status: Option<String>,
    }

    #[test]
    fn min_max_pair_collapses_into_range() {
        let search = Search {
            min_year: Some(2000),
            max_year: Some(2020),
            ..Search::default()
        };
        assert_eq!(build_query(&search).expect("must encode"), "Year=2000-2020");
    }

    #[test]
    fn lone_bound_is_dropped() {
        let search = Search {
            min_rating: Some(7.5),
            status: Some("completed".to_owned()),
            ..Search::default()
        };
        assert_eq!(build_query(&search).expect("must encode"), "Status=completed");
    }

    #[test]
    fn keys_and_values_are_percent_encoded() {
        #[derive(Serialize)]
        struct Request {
            #[serde(rename = "name ru")]
            name: &'static str,
            #[serde(rename = "minRating.kp")]
            min_kp: f64,
            #[serde(rename = "maxRating.kp")]
            max_kp: f64,
        }

        let query = build_query(&Request {
            name: "Брат & сестра",
            min_kp: 7.5,
            max_kp: 10.0,
        })
        .expect("must encode");

        assert_eq!(
            query,
            "name%20ru=%D0%91%D1%80%D0%B0%D1%82%20%26%20%D1%81%D0%B5%D1%81%D1%82%D1%80%D0%B0&Rating.kp=7.5-10.0"
        );
    }

    #[test]
    fn arrays_repeat_the_key() {
        #[derive(Serialize)]
        struct Request {
            kind: Vec<&'static str>,
        }
        let query = build_query(&Request {
            kind: vec!["movie", "anime"],
        })
        .expect("must encode");
        assert_eq!(query, "kind=movie&kind=anime");
    }

    #[test]
    fn with_query_skips_separator_for_empty_query() {
        assert_eq!(
            with_query("/v1.4/movie/random", &Search::default()).expect("must encode"),
            "/v1.4/movie/random"
        );
        let search = Search {
            id: Some(42),
            ..Search::default()
        };
        assert_eq!(
            with_query("/v1.4/movie/random", &search).expect("must encode"),
            "/v1.4/movie/random?Id=42"
        );
    }
}
