//! State variables and their validation rules.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::data_type::{DataType, Value};
use crate::error::{DescriptionError, Result};

/// Raw `allowedValueRange` bounds as written in the SCPD.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedValueRange {
    pub min: Option<String>,
    pub max: Option<String>,
    pub step: Option<String>,
}

/// Parsed `stateVariable` element, before coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct StateVariableSpec {
    pub name: String,
    pub send_events: bool,
    pub data_type: DataType,
    pub default_value: Option<String>,
    pub allowed_value_range: Option<AllowedValueRange>,
    pub allowed_values: Option<Vec<String>>,
}

/// Current value of a state variable.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum StateValue {
    /// Never set
    #[default]
    Unset,
    /// Last update passed validation
    Valid(Value),
    /// Last update could not be coerced; holds the raw wire string
    Invalid(String),
}

/// A state variable of a service, holding the last known value.
#[derive(Debug)]
pub struct StateVariable {
    spec: StateVariableSpec,
    strict: bool,
    default_value: Option<Value>,
    allowed: Vec<Value>,
    min: Option<Value>,
    max: Option<Value>,
    value: RwLock<StateValue>,
    updated_at: RwLock<Option<DateTime<Utc>>>,
}

impl StateVariable {
    /// Build a state variable, coercing its default and bounds.
    ///
    /// In strict mode a default that fails coercion is an error; otherwise it
    /// is dropped. Allowed values and range bounds that fail coercion are
    /// ignored in both modes.
    pub fn from_spec(spec: StateVariableSpec, strict: bool) -> Result<Self> {
        let data_type = spec.data_type;

        let default_value = match spec.default_value.as_deref() {
            None | Some("") => None,
            Some(raw) => match data_type.coerce(raw) {
                Ok(value) => Some(value),
                Err(e) if strict => {
                    return Err(DescriptionError::InvalidValue {
                        name: spec.name.clone(),
                        value: raw.to_string(),
                        reason: e.to_string(),
                    })
                }
                Err(e) => {
                    tracing::debug!("Ignoring default value of {}: {}", spec.name, e);
                    None
                }
            },
        };

        let allowed = spec
            .allowed_values
            .iter()
            .flatten()
            .filter_map(|raw| data_type.coerce(raw).ok())
            .collect();

        let bound = |raw: Option<&String>| {
            raw.filter(|raw| !raw.is_empty())
                .and_then(|raw| data_type.coerce(raw).ok())
        };
        let range = spec.allowed_value_range.as_ref();
        let min = bound(range.and_then(|r| r.min.as_ref()));
        let max = bound(range.and_then(|r| r.max.as_ref()));

        Ok(Self {
            spec,
            strict,
            default_value,
            allowed,
            min,
            max,
            value: RwLock::new(StateValue::Unset),
            updated_at: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn send_events(&self) -> bool {
        self.spec.send_events
    }

    pub fn data_type(&self) -> DataType {
        self.spec.data_type
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    pub fn allowed_value_range(&self) -> Option<&AllowedValueRange> {
        self.spec.allowed_value_range.as_ref()
    }

    pub fn allowed_values(&self) -> Option<&[String]> {
        self.spec.allowed_values.as_deref()
    }

    /// Coerced lower bound of the allowed range.
    pub fn min_value(&self) -> Option<&Value> {
        self.min.as_ref()
    }

    /// Coerced upper bound of the allowed range.
    pub fn max_value(&self) -> Option<&Value> {
        self.max.as_ref()
    }

    pub fn coerce(&self, raw: &str) -> Result<Value> {
        self.spec
            .data_type
            .coerce(raw)
            .map_err(|e| self.invalid(raw.to_string(), e.to_string()))
    }

    pub fn to_upnp(&self, value: &Value) -> String {
        value.to_upnp()
    }

    /// Run the checks for this variable in order: type, timezone, then the
    /// allowed-value list and range when strict.
    pub fn validate(&self, value: &Value) -> Result<()> {
        self.spec
            .data_type
            .check(value)
            .map_err(|reason| self.invalid(value.to_upnp(), reason))?;

        if !self.strict {
            return Ok(());
        }

        if !self.allowed.is_empty() && !self.allowed.contains(value) {
            return Err(self.invalid(value.to_upnp(), "value not in allowed values".to_string()));
        }

        if let Some(min) = &self.min {
            if value.partial_cmp(min).map_or(true, |o| o.is_lt()) {
                return Err(self.invalid(value.to_upnp(), format!("value must be at least {}", min)));
            }
        }
        if let Some(max) = &self.max {
            if value.partial_cmp(max).map_or(true, |o| o.is_gt()) {
                return Err(self.invalid(value.to_upnp(), format!("value must be at most {}", max)));
            }
        }
        Ok(())
    }

    /// Validate and store a typed value.
    pub fn set_value(&self, value: Value) -> Result<()> {
        self.validate(&value)?;
        *self.value.write() = StateValue::Valid(value);
        *self.updated_at.write() = Some(Utc::now());
        Ok(())
    }

    /// Store a value received on the wire.
    ///
    /// A string that cannot be coerced is stored as [`StateValue::Invalid`]
    /// and reported as success. A coerced value that fails validation is an
    /// error and leaves the current value untouched.
    pub fn set_upnp_value(&self, raw: &str) -> Result<()> {
        match self.spec.data_type.coerce(raw) {
            Ok(value) => self.set_value(value),
            Err(e) => {
                tracing::debug!("Error setting upnp value of {}: {}", self.spec.name, e);
                *self.value.write() = StateValue::Invalid(raw.to_string());
                *self.updated_at.write() = Some(Utc::now());
                Ok(())
            }
        }
    }

    /// Last valid value; `None` when unset or invalid.
    pub fn value(&self) -> Option<Value> {
        match &*self.value.read() {
            StateValue::Valid(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn value_unchecked(&self) -> StateValue {
        self.value.read().clone()
    }

    pub fn upnp_value(&self) -> Option<String> {
        self.value().map(|value| value.to_upnp())
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        *self.updated_at.read()
    }

    fn invalid(&self, value: String, reason: String) -> DescriptionError {
        DescriptionError::InvalidValue {
            name: self.spec.name.clone(),
            value,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn spec(data_type: DataType) -> StateVariableSpec {
        StateVariableSpec {
            name: "Var".to_string(),
            send_events: false,
            data_type,
            default_value: None,
            allowed_value_range: None,
            allowed_values: None,
        }
    }

    fn volume(strict: bool) -> StateVariable {
        StateVariable::from_spec(
            StateVariableSpec {
                name: "Volume".to_string(),
                send_events: true,
                allowed_value_range: Some(AllowedValueRange {
                    min: Some("0".to_string()),
                    max: Some("100".to_string()),
                    step: Some("1".to_string()),
                }),
                ..spec(DataType::Ui1)
            },
            strict,
        )
        .unwrap()
    }

    #[test]
    fn test_allowed_values_reject_unknown() {
        let var = StateVariable::from_spec(
            StateVariableSpec {
                default_value: Some("2".to_string()),
                allowed_values: Some(vec!["1".into(), "2".into(), "3".into()]),
                ..spec(DataType::Ui4)
            },
            true,
        )
        .unwrap();

        assert_eq!(var.default_value(), Some(&Value::UnsignedInteger(2)));
        assert!(var.set_upnp_value("3").is_ok());

        let err = var.set_upnp_value("4").unwrap_err();
        assert!(matches!(err, DescriptionError::InvalidValue { ref value, .. } if value == "4"));
        assert_eq!(var.value(), Some(Value::UnsignedInteger(3)));
    }

    #[test]
    fn test_non_strict_skips_enumeration_and_range() {
        let var = StateVariable::from_spec(
            StateVariableSpec {
                allowed_values: Some(vec!["1".into()]),
                ..spec(DataType::Ui4)
            },
            false,
        )
        .unwrap();
        assert!(var.set_upnp_value("4").is_ok());
        assert_eq!(var.value(), Some(Value::UnsignedInteger(4)));

        let var = volume(false);
        assert!(var.set_value(Value::UnsignedInteger(200)).is_ok());
    }

    #[rstest]
    #[case("0", true)]
    #[case("55", true)]
    #[case("100", true)]
    #[case("101", false)]
    fn test_range(#[case] raw: &str, #[case] ok: bool) {
        assert_eq!(volume(true).set_upnp_value(raw).is_ok(), ok);
    }

    #[test]
    fn test_open_ended_range() {
        let var = StateVariable::from_spec(
            StateVariableSpec {
                allowed_value_range: Some(AllowedValueRange {
                    min: Some("-10".into()),
                    max: None,
                    step: None,
                }),
                ..spec(DataType::I4)
            },
            true,
        )
        .unwrap();
        assert_eq!(var.min_value(), Some(&Value::Integer(-10)));
        assert!(var.max_value().is_none());
        assert!(var.set_value(Value::Integer(1_000_000)).is_ok());
        assert!(var.set_value(Value::Integer(-11)).is_err());
    }

    #[test]
    fn test_uncoercible_value_is_stored_as_invalid() {
        let var = volume(true);
        var.set_upnp_value("40").unwrap();
        assert!(var.set_upnp_value("loud").is_ok());
        assert_eq!(var.value(), None);
        assert_eq!(var.value_unchecked(), StateValue::Invalid("loud".to_string()));
        assert!(var.updated_at().is_some());
    }

    #[test]
    fn test_bad_default() {
        let bad = StateVariableSpec {
            default_value: Some("many".to_string()),
            ..spec(DataType::I2)
        };
        assert!(StateVariable::from_spec(bad.clone(), false)
            .unwrap()
            .default_value()
            .is_none());
        assert!(matches!(
            StateVariable::from_spec(bad, true),
            Err(DescriptionError::InvalidValue { .. })
        ));

        let empty = StateVariableSpec {
            default_value: Some(String::new()),
            ..spec(DataType::I2)
        };
        assert!(StateVariable::from_spec(empty, true).unwrap().default_value().is_none());
    }

    #[test]
    fn test_tz_validator_applies_in_non_strict_mode() {
        let var = StateVariable::from_spec(spec(DataType::DateTimeTz), false).unwrap();
        assert!(var.set_upnp_value("2020-01-01T00:00:00").is_err());
        assert!(var.set_upnp_value("2020-01-01T00:00:00+01:00").is_ok());
        assert_eq!(var.upnp_value().as_deref(), Some("2020-01-01T00:00:00+01:00"));
    }

    #[test]
    fn test_unset_until_first_update() {
        let var = volume(true);
        assert_eq!(var.value_unchecked(), StateValue::Unset);
        assert!(var.upnp_value().is_none());
        assert!(var.updated_at().is_none());
    }
}
