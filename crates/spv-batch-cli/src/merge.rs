//! Layering of config values: the config file first, then the command line on top.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{from_value, to_value, Result, Value};

/// Overlays `overrides` onto `base` (converting both to JSON in the process),
/// taking only the override values that differ from `T::default()`.
pub fn merge<T>(base: &T, overrides: &T) -> Result<T>
where
    T: Default + Serialize + DeserializeOwned,
{
    let mut merged = to_value(base)?;
    let defaults = to_value(T::default())?;
    overlay(&mut merged, to_value(overrides)?, &defaults);
    from_value(merged)
}

/// Recursively overlays `incoming` onto `target`, skipping leaves equal to their default.
fn overlay(target: &mut Value, incoming: Value, defaults: &Value) {
    match (target, incoming) {
        (Value::Object(target), Value::Object(incoming)) => {
            for (key, value) in incoming {
                let default = defaults.get(&key).unwrap_or(&Value::Null);
                overlay(target.entry(key).or_insert(Value::Null), value, default);
            }
        }
        (target, incoming) => {
            if incoming != *defaults {
                *target = incoming;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Layer {
        name: String,
        count: u32,
        flags: Vec<String>,
        limit: Option<u32>,
    }

    impl Default for Layer {
        fn default() -> Self {
            Self {
                name: "default".to_owned(),
                count: 1,
                flags: Vec::new(),
                limit: None,
            }
        }
    }

    #[test]
    fn non_default_overrides_win() {
        let base = Layer {
            name: "file".to_owned(),
            count: 5,
            flags: vec!["a".to_owned()],
            limit: Some(3),
        };
        let overrides = Layer {
            count: 9,
            ..Layer::default()
        };
        let merged = merge(&base, &overrides).unwrap();
        assert_eq!(
            merged,
            Layer {
                name: "file".to_owned(),
                count: 9,
                flags: vec!["a".to_owned()],
                limit: Some(3),
            }
        );
    }

    #[test]
    fn all_defaults_keep_base() {
        let base = Layer {
            name: "file".to_owned(),
            ..Layer::default()
        };
        let merged = merge(&base, &Layer::default()).unwrap();
        assert_eq!(merged, base);
    }
}
