// JSON document helpers for dotted-path access

use serde_json::{Map, Value};

/// Every value reachable through a dotted path. Arrays met along the way are
/// traversed element by element, so `repositories.stargazers` yields one
/// value per repository.
pub fn values_at<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![doc];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            collect_segment(value, segment, &mut next);
        }
        current = next;
    }

    // A terminal array contributes its elements
    current
        .into_iter()
        .flat_map(|value| match value {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        })
        .collect()
}

fn collect_segment<'a>(value: &'a Value, segment: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(segment) {
                out.push(child);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_segment(item, segment, out);
            }
        }
        _ => {}
    }
}

/// First value at an exact dotted path, without array traversal
pub fn value_at<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(doc, |value, segment| value.as_object()?.get(segment))
}

/// Replace (or create) the value at a dotted path
pub fn set_path(doc: &mut Value, path: &str, new_value: Value) {
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    let Value::Object(map) = doc else {
        return;
    };

    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), new_value);
        }
        Some((head, rest)) => {
            let child = map.entry(head.to_string()).or_insert(Value::Null);
            set_path(child, rest, new_value);
        }
    }
}

/// Sum of the numeric values reachable through `path`; other values are ignored
pub fn sum_numeric(doc: &Value, path: &str) -> i64 {
    values_at(doc, path).into_iter().filter_map(as_count).sum()
}

fn as_count(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_values_at_traverses_arrays() {
        let doc = json!({
            "repositories": [
                {"stargazers": 3, "language": "Rust"},
                {"stargazers": 4, "language": "Go"},
                {"language": "C"}
            ]
        });

        assert_eq!(values_at(&doc, "repositories.stargazers").len(), 2);
        assert_eq!(sum_numeric(&doc, "repositories.stargazers"), 7);
        assert_eq!(sum_numeric(&doc, "repositories.forks"), 0);
    }

    #[test]
    fn test_sum_numeric_scalar_and_missing() {
        let doc = json!({"stargazers": 10, "owner": {"location": "Taipei"}});

        assert_eq!(sum_numeric(&doc, "stargazers"), 10);
        assert_eq!(sum_numeric(&doc, "missing"), 0);
        assert_eq!(
            value_at(&doc, "owner.location").and_then(Value::as_str),
            Some("Taipei")
        );
    }

    #[test]
    fn test_set_path_creates_nested_objects() {
        let mut doc = json!({"_id": "a"});
        set_path(&mut doc, "repositories", json!({"language": "Rust"}));
        set_path(&mut doc, "owner.location", json!("Tokyo"));

        assert_eq!(doc["repositories"]["language"], "Rust");
        assert_eq!(doc["owner"]["location"], "Tokyo");
    }
}
