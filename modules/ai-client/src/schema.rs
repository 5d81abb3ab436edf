use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Types that can be requested as structured output from any backend.
///
/// Blanket-implemented for `JsonSchema + DeserializeOwned`.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    /// JSON schema in the strict dialect the chat APIs accept:
    /// every object closed (`additionalProperties: false`), every property
    /// listed in `required` (nullable ones included), and no `$ref`s.
    fn strict_schema() -> Value {
        let root = schema_for!(Self);
        let mut value = serde_json::to_value(root).unwrap_or(Value::Null);

        let definitions = match &mut value {
            Value::Object(map) => {
                map.remove("$schema");
                map.remove("definitions")
            }
            _ => None,
        };

        if let Some(Value::Object(defs)) = definitions {
            resolve_refs(&mut value, &defs);
        }
        close_objects(&mut value);
        value
    }

    fn type_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

fn resolve_refs(value: &mut Value, defs: &Map<String, Value>) {
    match value {
        Value::Object(map) => {
            let target = map
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix("#/definitions/"))
                .and_then(|name| defs.get(name))
                .cloned();
            if let Some(mut def) = target {
                resolve_refs(&mut def, defs);
                *value = def;
                return;
            }

            // schemars wraps documented fields as `allOf: [{$ref}]`
            let single = match map.get("allOf") {
                Some(Value::Array(items)) if items.len() == 1 => Some(items[0].clone()),
                _ => None,
            };
            if let Some(mut inner) = single {
                resolve_refs(&mut inner, defs);
                *value = inner;
                return;
            }

            for child in map.values_mut() {
                resolve_refs(child, defs);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| resolve_refs(v, defs)),
        _ => {}
    }
}

fn close_objects(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let is_object = match map.get("type") {
                Some(Value::String(t)) => t == "object",
                Some(Value::Array(ts)) => ts.iter().any(|t| t == "object"),
                _ => false,
            };
            if is_object {
                let keys: Vec<Value> = map
                    .get("properties")
                    .and_then(Value::as_object)
                    .map(|props| props.keys().cloned().map(Value::String).collect())
                    .unwrap_or_default();
                map.insert("additionalProperties".into(), Value::Bool(false));
                map.insert("required".into(), Value::Array(keys));
            }
            map.values_mut().for_each(close_objects);
        }
        Value::Array(items) => items.iter_mut().for_each(close_objects),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Citation {
        url: String,
        quote: Option<String>,
    }

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Report {
        /// Verdict text
        verdict: String,
        corrected_date: Option<String>,
        source: Citation,
    }

    #[test]
    fn nullable_fields_are_still_required() {
        let schema = Report::strict_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(required.contains(&"verdict"));
        assert!(required.contains(&"corrected_date"));
        assert_eq!(schema["additionalProperties"], Value::Bool(false));
    }

    #[test]
    fn nested_types_are_inlined_and_closed() {
        let schema = Report::strict_schema();
        assert!(schema.get("definitions").is_none());
        assert!(schema.get("$schema").is_none());

        let source = &schema["properties"]["source"];
        assert!(source.get("$ref").is_none());
        assert_eq!(source["type"], "object");
        assert_eq!(source["additionalProperties"], Value::Bool(false));
    }
}
