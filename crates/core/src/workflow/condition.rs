//! Typed step conditions.
//!
//! A step applies to an approval when every predicate of its condition holds
//! against the attribute bag supplied when the approval was opened. A
//! predicate whose field is absent, or whose value has a different type than
//! the attribute, does not hold.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use carehome_shared::types::Money;

use super::error::WorkflowError;

/// Attribute name carrying the gated amount.
pub const AMOUNT: &str = "amount";

/// One typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Boolean flag.
    Flag(bool),
    /// Integer amount in the smallest currency unit.
    Amount(i64),
    /// Free text.
    Text(String),
}

impl From<Money> for AttributeValue {
    fn from(value: Money) -> Self {
        Self::Amount(value.units())
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Attributes of a gated resource, evaluated by step conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bag holding only `amount`.
    #[must_use]
    pub fn with_amount(amount: Money) -> Self {
        Self::new().with(AMOUNT, amount)
    }

    /// Adds an attribute, builder style.
    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<AttributeValue>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    /// Looks up an attribute.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&AttributeValue> {
        self.0.get(field)
    }

    /// The gated amount, if supplied.
    #[must_use]
    pub fn amount(&self) -> Option<Money> {
        match self.get(AMOUNT) {
            Some(AttributeValue::Amount(units)) => Some(Money::new(*units)),
            _ => None,
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
}

impl Operator {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
        }
    }
}

/// `{field, operator, value}` predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    /// Attribute name.
    pub field: String,
    /// Comparison.
    pub operator: Operator,
    /// Right-hand side.
    pub value: AttributeValue,
}

impl Predicate {
    /// Creates a predicate.
    pub fn new(field: &str, operator: Operator, value: impl Into<AttributeValue>) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value: value.into(),
        }
    }

    /// Evaluates the predicate against `attributes`.
    #[must_use]
    pub fn holds(&self, attributes: &Attributes) -> bool {
        let Some(actual) = attributes.get(&self.field) else {
            return false;
        };
        let ordering = match (actual, &self.value) {
            (AttributeValue::Amount(a), AttributeValue::Amount(b)) => a.cmp(b),
            (AttributeValue::Text(a), AttributeValue::Text(b)) => a.cmp(b),
            (AttributeValue::Flag(a), AttributeValue::Flag(b)) => {
                if !matches!(self.operator, Operator::Eq | Operator::Ne) {
                    return false;
                }
                a.cmp(b)
            }
            _ => return false,
        };
        self.operator.accepts(ordering)
    }
}

/// Conjunction of predicates deciding whether a step applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepCondition(Vec<Predicate>);

impl StepCondition {
    /// A condition that always holds.
    #[must_use]
    pub fn always() -> Self {
        Self::default()
    }

    /// Adds a predicate, builder style.
    #[must_use]
    pub fn and(mut self, predicate: Predicate) -> Self {
        self.0.push(predicate);
        self
    }

    /// Requires `amount >= min`.
    #[must_use]
    pub fn min_amount(self, min: Money) -> Self {
        self.and(Predicate::new(AMOUNT, Operator::Gte, min))
    }

    /// Requires `amount <= max`.
    #[must_use]
    pub fn max_amount(self, max: Money) -> Self {
        self.and(Predicate::new(AMOUNT, Operator::Lte, max))
    }

    /// Predicates of the condition.
    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.0
    }

    /// Returns true if the step applies.
    #[must_use]
    pub fn applies_to(&self, attributes: &Attributes) -> bool {
        self.0.iter().all(|p| p.holds(attributes))
    }

    /// Parses a stored condition blob.
    ///
    /// Accepts `null`, a legacy object such as `{"minAmount": 5000000}` (also
    /// `maxAmount` and the snake_case spellings), or an array of
    /// `{field, operator, value}` predicates.
    pub fn from_json(value: &Value) -> Result<Self, WorkflowError> {
        match value {
            Value::Null => Ok(Self::always()),
            Value::Array(_) => serde_json::from_value(value.clone())
                .map_err(|e| WorkflowError::InvalidCondition(e.to_string())),
            Value::Object(map) => {
                let mut condition = Self::always();
                for (key, raw) in map {
                    let bound = legacy_amount(key, raw)?;
                    condition = match key.as_str() {
                        "minAmount" | "min_amount" => condition.min_amount(bound),
                        "maxAmount" | "max_amount" => condition.max_amount(bound),
                        _ => {
                            return Err(WorkflowError::InvalidCondition(format!(
                                "unknown condition key `{key}`"
                            )));
                        }
                    };
                }
                Ok(condition)
            }
            other => Err(WorkflowError::InvalidCondition(format!(
                "expected object or array, got {other}"
            ))),
        }
    }
}

fn legacy_amount(key: &str, raw: &Value) -> Result<Money, WorkflowError> {
    let units = match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    units
        .map(Money::new)
        .ok_or_else(|| WorkflowError::InvalidCondition(format!("`{key}` must be an integer amount")))
}
