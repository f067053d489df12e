use crate::candle_utils::normalize_symbol;
use crate::error::EngineError;
use crate::preset_store::{ParameterBag, PresetStore, ACTIVE_FLAG};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Keys that live in a preset but are never strategy inputs.
const RESERVED_KEYS: [&str; 2] = [ACTIVE_FLAG, "preset"];

pub const SYMBOL_PARAM: &str = "symbol";
pub const TIMEFRAME_PARAM: &str = "timeframe";
pub const LIMIT_PARAM: &str = "limit";
pub const INITIAL_CAPITAL_PARAM: &str = "initial_capital";

pub const DEFAULT_SYMBOL: &str = "BTCUSDT";
pub const DEFAULT_TIMEFRAME: &str = "1m";
pub const DEFAULT_FETCH_LIMIT: u64 = 1000;
pub const DEFAULT_INITIAL_CAPITAL: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ParamValue {
    fn to_json(&self) -> Value {
        match self {
            ParamValue::Bool(flag) => Value::Bool(*flag),
            ParamValue::Number(number) => Number::from_f64(*number)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ParamValue::Text(text) => Value::String(text.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    PositiveInteger,
    Number,
    Text,
}

#[derive(Debug, Clone)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub kind: ParameterKind,
    pub default: Option<ParamValue>,
}

impl ParameterSpec {
    pub fn required(name: &'static str, kind: ParameterKind) -> Self {
        Self {
            name,
            kind,
            default: None,
        }
    }

    pub fn with_default(name: &'static str, kind: ParameterKind, default: ParamValue) -> Self {
        Self {
            name,
            kind,
            default: Some(default),
        }
    }
}

/// Inputs every strategy receives regardless of its own parameters.
pub fn platform_parameter_specs() -> Vec<ParameterSpec> {
    vec![
        ParameterSpec::with_default(
            SYMBOL_PARAM,
            ParameterKind::Text,
            ParamValue::Text(DEFAULT_SYMBOL.to_string()),
        ),
        ParameterSpec::with_default(
            TIMEFRAME_PARAM,
            ParameterKind::Text,
            ParamValue::Text(DEFAULT_TIMEFRAME.to_string()),
        ),
        ParameterSpec::with_default(
            LIMIT_PARAM,
            ParameterKind::PositiveInteger,
            ParamValue::Number(DEFAULT_FETCH_LIMIT as f64),
        ),
        ParameterSpec::with_default(
            INITIAL_CAPITAL_PARAM,
            ParameterKind::Number,
            ParamValue::Number(DEFAULT_INITIAL_CAPITAL),
        ),
    ]
}

/// Where a run takes its parameters from.
#[derive(Debug, Clone)]
pub enum ParameterSource {
    /// A named preset of the scope.
    Preset(String),
    /// Whichever preset of the scope is flagged active.
    ActivePreset,
    /// A bag supplied directly by the caller, in any accepted shape.
    Inline(Value),
}

/// Flat, typed parameter map handed to a strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedParameters {
    values: BTreeMap<String, ParamValue>,
}

impl ResolvedParameters {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn positive_integer(&self, name: &str) -> Result<usize, EngineError> {
        match self.values.get(name) {
            Some(ParamValue::Number(value)) => as_positive_integer(name, *value),
            Some(other) => Err(EngineError::invalid_parameter(
                name,
                format!("expected a positive integer, got {:?}", other),
            )),
            None => Err(EngineError::MissingParameter(name.to_string())),
        }
    }

    pub fn number(&self, name: &str) -> Result<f64, EngineError> {
        match self.values.get(name) {
            Some(ParamValue::Number(value)) => Ok(*value),
            Some(other) => Err(EngineError::invalid_parameter(
                name,
                format!("expected a number, got {:?}", other),
            )),
            None => Err(EngineError::MissingParameter(name.to_string())),
        }
    }

    pub fn text(&self, name: &str) -> Result<&str, EngineError> {
        match self.values.get(name) {
            Some(ParamValue::Text(value)) => Ok(value),
            Some(other) => Err(EngineError::invalid_parameter(
                name,
                format!("expected text, got {:?}", other),
            )),
            None => Err(EngineError::MissingParameter(name.to_string())),
        }
    }

    /// The single JSON object a strategy unit reads from its standard input.
    pub fn to_json_object(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

pub struct ParameterResolver<'a> {
    store: &'a PresetStore,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(store: &'a PresetStore) -> Self {
        Self { store }
    }

    /// Loads the bag named by `source` and resolves it against `specs`.
    /// A preset that does not exist resolves as an empty bag, so the
    /// failure surfaces as the first missing required parameter.
    pub fn resolve(
        &self,
        scope: &str,
        source: &ParameterSource,
        specs: &[ParameterSpec],
    ) -> Result<ResolvedParameters, EngineError> {
        let bag = match source {
            ParameterSource::Preset(name) => self.store.load(scope, name)?.unwrap_or_else(|| {
                warn!("Preset `{}` not found in scope `{}`", name, scope);
                ParameterBag::new()
            }),
            ParameterSource::ActivePreset => match self.store.active(scope)? {
                Some((name, bag)) => {
                    debug!("Using active preset `{}` of scope `{}`", name, scope);
                    bag
                }
                None => {
                    warn!("Scope `{}` has no active preset", scope);
                    ParameterBag::new()
                }
            },
            ParameterSource::Inline(value) => bag_from_input(value.clone())?,
        };
        resolve_bag(&bag, specs)
    }
}

/// Accepts every input shape seen in the wild and returns a canonical bag:
/// a plain object (values optionally wrapped as `{value, ..}`) or the older
/// array form `[{"name": .., "value": ..}]`.
pub fn bag_from_input(input: Value) -> Result<ParameterBag, EngineError> {
    match input {
        Value::Object(bag) => Ok(bag),
        Value::Array(entries) => {
            let mut bag = ParameterBag::new();
            for entry in entries {
                let Value::Object(mut fields) = entry else {
                    return Err(EngineError::invalid_parameter(
                        "inputs",
                        "array entries must be objects",
                    ));
                };
                let name = ["name", "key"]
                    .iter()
                    .find_map(|key| fields.get(*key).and_then(Value::as_str))
                    .map(str::to_string)
                    .ok_or_else(|| {
                        EngineError::invalid_parameter("inputs", "array entry without a name")
                    })?;
                let value = fields.remove("value").unwrap_or(Value::Null);
                bag.insert(name, value);
            }
            Ok(bag)
        }
        Value::Null => Ok(ParameterBag::new()),
        other => Err(EngineError::invalid_parameter(
            "inputs",
            format!("expected an object or an array, got {}", other),
        )),
    }
}

/// Unwraps `{value: ..}` records, applies declared defaults and checks types.
pub fn resolve_bag(
    bag: &ParameterBag,
    specs: &[ParameterSpec],
) -> Result<ResolvedParameters, EngineError> {
    let mut resolved = ResolvedParameters::default();

    for (name, raw) in bag {
        if RESERVED_KEYS.contains(&name.as_str()) {
            continue;
        }
        if let Some(value) = unwrap_value(name, raw) {
            resolved.insert(name.clone(), value);
        }
    }

    for spec in specs {
        let value = match resolved.values.remove(spec.name) {
            Some(value) => coerce(spec, value)?,
            None => match &spec.default {
                Some(default) => default.clone(),
                None => return Err(EngineError::MissingParameter(spec.name.to_string())),
            },
        };
        resolved.insert(spec.name, value);
    }

    if let Some(ParamValue::Text(symbol)) = resolved.values.get_mut(SYMBOL_PARAM) {
        match normalize_symbol(symbol) {
            Some(normalized) => *symbol = normalized,
            None => return Err(EngineError::invalid_parameter(SYMBOL_PARAM, "symbol is empty")),
        }
    }

    Ok(resolved)
}

fn unwrap_value(name: &str, raw: &Value) -> Option<ParamValue> {
    let raw = match raw {
        Value::Object(record) => match record.get("value") {
            Some(inner) => inner,
            None => {
                warn!("Skipping parameter `{}`: object without a `value` field", name);
                return None;
            }
        },
        other => other,
    };

    match raw {
        Value::Null => None,
        Value::Bool(flag) => Some(ParamValue::Bool(*flag)),
        Value::Number(number) => number.as_f64().map(ParamValue::Number),
        Value::String(text) => Some(ParamValue::Text(text.clone())),
        Value::Array(_) | Value::Object(_) => {
            warn!(
                "Skipping parameter `{}` due to unsupported composite value {}",
                name, raw
            );
            None
        }
    }
}

fn coerce(spec: &ParameterSpec, value: ParamValue) -> Result<ParamValue, EngineError> {
    match spec.kind {
        ParameterKind::Text => match value {
            ParamValue::Text(text) => Ok(ParamValue::Text(text)),
            ParamValue::Number(number) => Ok(ParamValue::Text(number.to_string())),
            ParamValue::Bool(_) => Err(EngineError::invalid_parameter(
                spec.name,
                "expected text, got a boolean",
            )),
        },
        ParameterKind::Number | ParameterKind::PositiveInteger => {
            let number = match value {
                ParamValue::Number(number) => number,
                ParamValue::Text(text) => text.trim().parse::<f64>().map_err(|_| {
                    EngineError::invalid_parameter(
                        spec.name,
                        format!("`{}` is not a number", text),
                    )
                })?,
                ParamValue::Bool(_) => {
                    return Err(EngineError::invalid_parameter(
                        spec.name,
                        "expected a number, got a boolean",
                    ))
                }
            };
            if !number.is_finite() {
                return Err(EngineError::invalid_parameter(
                    spec.name,
                    "value must be finite",
                ));
            }
            if spec.kind == ParameterKind::PositiveInteger {
                as_positive_integer(spec.name, number)?;
            }
            Ok(ParamValue::Number(number))
        }
    }
}

fn as_positive_integer(name: &str, value: f64) -> Result<usize, EngineError> {
    if !value.is_finite() || value.fract() != 0.0 || value < 1.0 {
        return Err(EngineError::invalid_parameter(
            name,
            format!("expected a positive integer, got {}", value),
        ));
    }
    Ok(value as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn specs() -> Vec<ParameterSpec> {
        let mut specs = platform_parameter_specs();
        specs.push(ParameterSpec::required(
            "ema_fast",
            ParameterKind::PositiveInteger,
        ));
        specs.push(ParameterSpec::required(
            "ema_slow",
            ParameterKind::PositiveInteger,
        ));
        specs
    }

    fn bag(value: Value) -> ParameterBag {
        bag_from_input(value).expect("valid input shape")
    }

    #[test]
    fn unwraps_value_records_and_applies_defaults() {
        let resolved = resolve_bag(
            &bag(json!({
                "ema_fast": { "value": 12, "type": "int" },
                "ema_slow": { "value": "26" },
                "isActive": true,
                "preset": "fast"
            })),
            &specs(),
        )
        .unwrap();

        assert_eq!(resolved.positive_integer("ema_fast").unwrap(), 12);
        assert_eq!(resolved.positive_integer("ema_slow").unwrap(), 26);
        assert_eq!(resolved.text(SYMBOL_PARAM).unwrap(), "BTCUSDT");
        assert_eq!(resolved.text(TIMEFRAME_PARAM).unwrap(), "1m");
        assert_eq!(resolved.positive_integer(LIMIT_PARAM).unwrap(), 1000);
        assert_eq!(resolved.number(INITIAL_CAPITAL_PARAM).unwrap(), 100.0);
        assert!(resolved.get(ACTIVE_FLAG).is_none());
        assert!(resolved.get("preset").is_none());
    }

    #[test]
    fn missing_span_is_reported_by_name() {
        let err = resolve_bag(&bag(json!({ "ema_fast": 5 })), &specs()).unwrap_err();
        assert!(matches!(err, EngineError::MissingParameter(ref name) if name == "ema_slow"));

        let err = resolve_bag(&bag(json!({ "ema_fast": null, "ema_slow": 9 })), &specs())
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingParameter(ref name) if name == "ema_fast"));
    }

    #[test]
    fn rejects_non_integral_and_non_numeric_spans() {
        for bad in [json!(12.5), json!("abc"), json!(0), json!(-3), json!(true)] {
            let err = resolve_bag(&bag(json!({ "ema_fast": bad, "ema_slow": 20 })), &specs())
                .unwrap_err();
            assert!(
                matches!(err, EngineError::InvalidParameter { ref name, .. } if name == "ema_fast"),
                "unexpected error {err:?}"
            );
        }
    }

    #[test]
    fn accepts_legacy_array_shape() {
        let resolved = resolve_bag(
            &bag(json!([
                { "name": "ema_fast", "value": 3 },
                { "key": "ema_slow", "value": 7 },
                { "name": "symbol", "value": " ethusdt " }
            ])),
            &specs(),
        )
        .unwrap();
        assert_eq!(resolved.positive_integer("ema_fast").unwrap(), 3);
        assert_eq!(resolved.positive_integer("ema_slow").unwrap(), 7);
        assert_eq!(resolved.text(SYMBOL_PARAM).unwrap(), "ETHUSDT");
    }

    #[test]
    fn rejects_scalar_inputs() {
        assert!(matches!(
            bag_from_input(json!(42)),
            Err(EngineError::InvalidParameter { .. })
        ));
        assert!(bag_from_input(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn undeclared_parameters_pass_through() {
        let resolved = resolve_bag(
            &bag(json!({ "ema_fast": 2, "ema_slow": 4, "note": "x", "nested": {"a": 1} })),
            &specs(),
        )
        .unwrap();
        assert_eq!(resolved.get("note"), Some(&ParamValue::Text("x".to_string())));
        assert!(resolved.get("nested").is_none());

        let object = resolved.to_json_object();
        assert_eq!(object["ema_fast"], json!(2.0));
        assert_eq!(object["symbol"], json!("BTCUSDT"));
    }

    #[test]
    fn resolver_reads_named_and_active_presets() {
        let dir = tempfile::tempdir().unwrap();
        let store = PresetStore::new(dir.path().join("s"), dir.path().join("p"));
        store
            .save("scope", "slow", bag(json!({ "ema_fast": {"value": 10}, "ema_slow": {"value": 40} })))
            .unwrap();
        store
            .save("scope", "fast", bag(json!({ "ema_fast": {"value": 3}, "ema_slow": {"value": 8} })))
            .unwrap();

        let resolver = ParameterResolver::new(&store);
        let named = resolver
            .resolve("scope", &ParameterSource::Preset("slow".to_string()), &specs())
            .unwrap();
        assert_eq!(named.positive_integer("ema_slow").unwrap(), 40);

        let active = resolver
            .resolve("scope", &ParameterSource::ActivePreset, &specs())
            .unwrap();
        assert_eq!(active.positive_integer("ema_fast").unwrap(), 3);

        let missing = resolver
            .resolve("scope", &ParameterSource::Preset("nope".to_string()), &specs())
            .unwrap_err();
        assert!(matches!(missing, EngineError::MissingParameter(_)));
    }
}
