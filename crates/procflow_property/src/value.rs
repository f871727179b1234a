use serde::{Deserialize, Serialize};

/// The value held by a [`Property`](crate::Property).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PropertyValue {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "bool")]
    Bool(bool),
    #[serde(rename = "int")]
    Int(i64),
    #[serde(rename = "float")]
    Float(f64),
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "vector")]
    Vector(Vec<f64>),
}

impl PropertyValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            PropertyValue::None => "none",
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Int(_) => "int",
            PropertyValue::Float(_) => "float",
            PropertyValue::Text(_) => "text",
            PropertyValue::Vector(_) => "vector",
        }
    }

    pub fn same_kind(&self, other: &PropertyValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Converts `self` into the kind of `target`.
    ///
    /// Identical kinds convert trivially; ints and floats convert into each
    /// other. Everything else is incompatible.
    pub fn convert_like(&self, target: &PropertyValue) -> Option<PropertyValue> {
        match (self, target) {
            (a, b) if a.same_kind(b) => Some(a.clone()),
            (PropertyValue::Int(v), PropertyValue::Float(_)) => Some(PropertyValue::Float(*v as f64)),
            (PropertyValue::Float(v), PropertyValue::Int(_)) => {
                Some(PropertyValue::Int(v.round() as i64))
            }
            _ => None,
        }
    }

    pub fn is_convertible_to(&self, target: &PropertyValue) -> bool {
        self.convert_like(target).is_some()
    }

    /// Clamps numeric values into `[min, max]`. Non-numeric values and bounds
    /// of a different kind are left alone.
    pub fn clamped(self, min: Option<&PropertyValue>, max: Option<&PropertyValue>) -> PropertyValue {
        match self {
            PropertyValue::Int(mut v) => {
                if let Some(PropertyValue::Int(lo)) = min {
                    v = v.max(*lo);
                }
                if let Some(PropertyValue::Int(hi)) = max {
                    v = v.min(*hi);
                }
                PropertyValue::Int(v)
            }
            PropertyValue::Float(mut v) => {
                if let Some(PropertyValue::Float(lo)) = min {
                    v = v.max(*lo);
                }
                if let Some(PropertyValue::Float(hi)) = max {
                    v = v.min(*hi);
                }
                PropertyValue::Float(v)
            }
            PropertyValue::Vector(mut values) => {
                for (i, v) in values.iter_mut().enumerate() {
                    if let Some(PropertyValue::Vector(lo)) = min {
                        if let Some(lo) = lo.get(i) {
                            *v = v.max(*lo);
                        }
                    }
                    if let Some(PropertyValue::Vector(hi)) = max {
                        if let Some(hi) = hi.get(i) {
                            *v = v.min(*hi);
                        }
                    }
                }
                PropertyValue::Vector(values)
            }
            other => other,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            PropertyValue::Vector(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(value as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

impl From<Vec<f64>> for PropertyValue {
    fn from(value: Vec<f64>) -> Self {
        PropertyValue::Vector(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_between_numbers() {
        let target = PropertyValue::Float(0.0);
        assert_eq!(
            PropertyValue::Int(3).convert_like(&target),
            Some(PropertyValue::Float(3.0))
        );
        assert_eq!(
            PropertyValue::Float(2.6).convert_like(&PropertyValue::Int(0)),
            Some(PropertyValue::Int(3))
        );
        assert_eq!(PropertyValue::Text("x".into()).convert_like(&target), None);
    }

    #[test]
    fn test_clamp_respects_bounds() {
        let min = PropertyValue::Int(0);
        let max = PropertyValue::Int(10);
        assert_eq!(
            PropertyValue::Int(42).clamped(Some(&min), Some(&max)),
            PropertyValue::Int(10)
        );
        assert_eq!(
            PropertyValue::Int(-1).clamped(Some(&min), None),
            PropertyValue::Int(0)
        );

        let lo = PropertyValue::Vector(vec![0.0, 0.0]);
        let hi = PropertyValue::Vector(vec![1.0, 1.0]);
        assert_eq!(
            PropertyValue::Vector(vec![-0.5, 2.0]).clamped(Some(&lo), Some(&hi)),
            PropertyValue::Vector(vec![0.0, 1.0])
        );
    }
}
