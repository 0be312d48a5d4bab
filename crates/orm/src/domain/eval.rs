//! In-memory evaluation of a domain leaf, used where values do not live in a
//! plain column (properties) and to check rule domains against fixtures.

use std::cmp::Ordering;

use regex::Regex;
use serde_json::Value;

use super::Operator;

/// Translate a SQL LIKE pattern into an anchored regex
pub fn like_to_regex(pattern: &str, case_insensitive: bool) -> Option<Regex> {
    let mut expr = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '%' => expr.push_str(".*"),
            '_' => expr.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    expr.push_str(&regex::escape(&next.to_string()));
                }
            }
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).ok()
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Bool(false)) | (Value::Bool(false), Value::Null) => true,
        (Value::Number(_), Value::Number(_)) => compare(left, right) == Some(Ordering::Equal),
        // many2one values may come back as [id, name]
        (Value::Array(parts), other) | (other, Value::Array(parts))
            if parts.len() == 2 && parts[0].is_number() && other.is_number() =>
        {
            equals(&parts[0], other)
        }
        _ => left == right,
    }
}

/// Evaluate `left <op> right`
pub fn matches(operator: Operator, left: &Value, right: &Value) -> bool {
    match operator {
        Operator::Eq => equals(left, right),
        Operator::Ne => !equals(left, right),
        Operator::Lt => compare(left, right) == Some(Ordering::Less),
        Operator::Gt => compare(left, right) == Some(Ordering::Greater),
        Operator::Le => matches!(compare(left, right), Some(Ordering::Less | Ordering::Equal)),
        Operator::Ge => matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::In | Operator::ChildOf => match right {
            Value::Array(items) => items.iter().any(|item| equals(left, item)),
            single => equals(left, single),
        },
        Operator::NotIn => !matches(Operator::In, left, right),
        Operator::Like | Operator::ILike => {
            let (Some(text), Some(pattern)) = (left.as_str(), right.as_str()) else {
                return false;
            };
            like_to_regex(pattern, operator == Operator::ILike)
                .map(|re| re.is_match(text))
                .unwrap_or(false)
        }
        Operator::NotLike | Operator::NotILike => {
            !matches(operator.positive(), left, right)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_like_patterns() {
        assert!(matches(Operator::Like, &json!("foobar"), &json!("foo%")));
        assert!(!matches(Operator::Like, &json!("Foobar"), &json!("foo%")));
        assert!(matches(Operator::ILike, &json!("Foobar"), &json!("foo%")));
        assert!(matches(Operator::Like, &json!("a.c"), &json!("a_c")));
        assert!(!matches(Operator::Like, &json!("abd"), &json!("a.d")));
        assert!(matches(Operator::NotILike, &json!("xyz"), &json!("%a%")));
    }

    #[test]
    fn test_comparisons() {
        assert!(matches(Operator::Lt, &json!(1), &json!(2.5)));
        assert!(matches(Operator::Ge, &json!("b"), &json!("a")));
        assert!(!matches(Operator::Gt, &json!(null), &json!(0)));
        assert!(matches(Operator::Eq, &json!(null), &json!(false)));
        assert!(matches(Operator::In, &json!([3, "Three"]), &json!([1, 3])));
        assert!(matches(Operator::NotIn, &json!(4), &json!([1, 3])));
    }
}
