//! Engine keys and key ranges
//!
//! Keys are totally ordered: every number sorts before every string, and every
//! string before every array. Numbers compare by value whether they are stored
//! as integers or floats. Arrays compare element by element.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A record key, as stored in an object store or produced by an index key path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    /// A number with a fractional part, or one outside the `i64` range.
    Float(f64),
    Text(String),
    Array(Vec<Key>),
}

/// 2^63, the first float past `i64::MAX`.
const I64_END: f64 = 9_223_372_036_854_775_808.0;

impl Key {
    /// Sorts before every key [`Key::from_value`] can produce.
    pub const MIN: Key = Key::Float(f64::NEG_INFINITY);

    /// Key for a float. Integral values in range become [`Key::Int`]; NaN is
    /// not a key.
    pub fn from_f64(n: f64) -> Option<Key> {
        if n.is_nan() {
            None
        } else if n.fract() == 0.0 && (-I64_END..I64_END).contains(&n) {
            Some(Key::Int(n as i64))
        } else {
            Some(Key::Float(n))
        }
    }

    /// Extract a key from a JSON value.
    ///
    /// Numbers, strings and arrays of valid keys are keys. Anything else
    /// (booleans, null, objects) is not.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Key::Int(i)),
                None => n.as_f64().and_then(Key::from_f64),
            },
            Value::String(s) => Some(Key::Text(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            _ => None,
        }
    }

    /// Convert back into the JSON representation used for inline keys.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(n) => Value::from(*n),
            Key::Float(n) => Value::from(*n),
            Key::Text(s) => Value::from(s.as_str()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    /// Whether `fragment` occurs inside this key.
    ///
    /// Text keys match on substring, array keys on element membership, and
    /// everything else on equality.
    pub fn contains_fragment(&self, fragment: &Key) -> bool {
        match (self, fragment) {
            (Key::Text(haystack), Key::Text(needle)) => haystack.contains(needle.as_str()),
            (Key::Array(items), _) => items.contains(fragment),
            _ => self == fragment,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Int(_) | Key::Float(_) => 0,
            Key::Text(_) => 1,
            Key::Array(_) => 2,
        }
    }
}

fn cmp_int_float(a: i64, b: f64) -> Ordering {
    match (a as f64).total_cmp(&b) {
        // Rounding can make distinct values look equal
        Ordering::Equal if (-I64_END..I64_END).contains(&b) => a.cmp(&(b as i64)),
        other => other,
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Int(a), Key::Int(b)) => a.cmp(b),
            (Key::Float(a), Key::Float(b)) => a.total_cmp(b),
            (Key::Int(a), Key::Float(b)) => cmp_int_float(*a, *b),
            (Key::Float(a), Key::Int(b)) => cmp_int_float(*b, *a).reverse(),
            (Key::Text(a), Key::Text(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(n) => write!(f, "{}", n),
            Key::Float(n) => write!(f, "{}", n),
            Key::Text(s) => write!(f, "{:?}", s),
            Key::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Int(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Int(n.into())
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Key::Array(items)
    }
}

/// A constraint on which keys a cursor or count visits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Bound<Key>,
    upper: Bound<Key>,
}

impl KeyRange {
    /// Only the given key.
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// Every key at or after `key`, or strictly after it when `open`.
    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: bound(key.into(), open),
            upper: Bound::Unbounded,
        }
    }

    /// Every key at or before `key`, or strictly before it when `open`.
    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: bound(key.into(), open),
        }
    }

    /// Keys between `lower` and `upper`.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Self {
        Self {
            lower: bound(lower.into(), lower_open),
            upper: bound(upper.into(), upper_open),
        }
    }

    pub fn lower(&self) -> Bound<&Key> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Bound<&Key> {
        self.upper.as_ref()
    }

    /// Whether `key` lies inside the range.
    pub fn contains(&self, key: &Key) -> bool {
        let above_lower = match &self.lower {
            Bound::Included(lower) => key >= lower,
            Bound::Excluded(lower) => key > lower,
            Bound::Unbounded => true,
        };
        let below_upper = match &self.upper {
            Bound::Included(upper) => key <= upper,
            Bound::Excluded(upper) => key < upper,
            Bound::Unbounded => true,
        };
        above_lower && below_upper
    }

    /// Whether `key` is past the upper end of the range.
    pub fn is_past(&self, key: &Key) -> bool {
        match &self.upper {
            Bound::Included(upper) => key > upper,
            Bound::Excluded(upper) => key >= upper,
            Bound::Unbounded => false,
        }
    }
}

fn bound(key: Key, open: bool) -> Bound<Key> {
    if open {
        Bound::Excluded(key)
    } else {
        Bound::Included(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_ordering_by_type() {
        let mut keys = vec![
            Key::Array(vec![Key::Int(1)]),
            Key::from("a"),
            Key::Int(10),
            Key::Int(-3),
            Key::from(""),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Key::Int(-3),
                Key::Int(10),
                Key::from(""),
                Key::from("a"),
                Key::Array(vec![Key::Int(1)]),
            ]
        );
    }

    #[test]
    fn test_key_from_value() {
        assert_eq!(Key::from_value(&json!(7)), Some(Key::Int(7)));
        assert_eq!(Key::from_value(&json!("x")), Some(Key::from("x")));
        assert_eq!(
            Key::from_value(&json!([1, "b"])),
            Some(Key::Array(vec![Key::Int(1), Key::from("b")]))
        );
        assert_eq!(Key::from_value(&json!(1.5)), Some(Key::Float(1.5)));
        assert!(matches!(Key::from_value(&json!(2.0)), Some(Key::Int(2))));
        assert_eq!(Key::from_value(&json!(null)), None);
        assert_eq!(Key::from_value(&json!([1, true])), None);
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let mut keys = vec![
            Key::from("0"),
            Key::Int(2),
            Key::Float(1.5),
            Key::Float(-0.25),
            Key::Int(1),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Key::Float(-0.25),
                Key::Int(1),
                Key::Float(1.5),
                Key::Int(2),
                Key::from("0"),
            ]
        );
        assert_eq!(Key::Float(3.0), Key::Int(3));
        assert!(Key::Int(i64::MAX) < Key::Float(1e19));
        assert!(Key::Int((1 << 53) + 1) > Key::Float(9_007_199_254_740_992.0));
        assert!(Key::MIN < Key::Int(i64::MIN));
        assert_eq!(Key::from_f64(f64::NAN), None);
    }

    #[test]
    fn test_key_serde_untagged() {
        let key: Key = serde_json::from_str("[3, \"c\"]").unwrap();
        assert_eq!(key, Key::Array(vec![Key::Int(3), Key::from("c")]));
        assert_eq!(serde_json::to_string(&Key::from("c")).unwrap(), "\"c\"");
        let float: Key = serde_json::from_str("0.5").unwrap();
        assert!(matches!(float, Key::Float(n) if n == 0.5));
    }

    #[test]
    fn test_contains_fragment() {
        assert!(Key::from("abc1").contains_fragment(&Key::from("abc")));
        assert!(Key::from("xabc").contains_fragment(&Key::from("abc")));
        assert!(!Key::from("xyz1").contains_fragment(&Key::from("abc")));
        assert!(Key::Array(vec![Key::Int(1), Key::Int(2)]).contains_fragment(&Key::Int(2)));
        assert!(Key::Int(5).contains_fragment(&Key::Int(5)));
        assert!(!Key::Int(5).contains_fragment(&Key::from("5")));
    }

    #[test]
    fn test_range_only() {
        let range = KeyRange::only(5);
        assert!(range.contains(&Key::Int(5)));
        assert!(!range.contains(&Key::Int(4)));
        assert!(!range.contains(&Key::Int(6)));
        assert!(range.is_past(&Key::Int(6)));
    }

    #[test]
    fn test_range_lower_bound_open_and_closed() {
        let closed = KeyRange::lower_bound(5, false);
        assert!(closed.contains(&Key::Int(5)));
        assert!(closed.contains(&Key::from("any string")));

        let open = KeyRange::lower_bound(5, true);
        assert!(!open.contains(&Key::Int(5)));
        assert!(open.contains(&Key::Int(6)));
        assert!(!open.is_past(&Key::Int(1_000)));
    }

    #[test]
    fn test_range_upper_bound() {
        let closed = KeyRange::upper_bound("m", false);
        assert!(closed.contains(&Key::Int(1)));
        assert!(closed.contains(&Key::from("m")));
        assert!(closed.is_past(&Key::from("n")));

        let open = KeyRange::upper_bound("m", true);
        assert!(!open.contains(&Key::from("m")));
        assert!(open.is_past(&Key::from("m")));
    }

    #[test]
    fn test_range_bound() {
        let range = KeyRange::bound(1, 3, true, false);
        assert!(!range.contains(&Key::Int(1)));
        assert!(range.contains(&Key::Int(2)));
        assert!(range.contains(&Key::Int(3)));
        assert!(range.is_past(&Key::Int(4)));
    }
}
