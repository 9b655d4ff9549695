//! Bound checks shared by the field rules. Each returns the rule codes that
//! were violated, in evaluation order; the caller renders the messages.

/// `min` and `max` are checked independently, so both fire only when `min > max`.
pub fn check_number_range(value: f64, min: f64, max: f64) -> Vec<&'static str> {
    let mut violated = Vec::new();
    if value < min {
        violated.push("min");
    }
    if value > max {
        violated.push("max");
    }
    violated
}

/// Length in characters, not bytes.
pub fn check_length(value: &str, min: Option<usize>, max: Option<usize>) -> Vec<&'static str> {
    let length = value.chars().count();
    let mut violated = Vec::new();
    if let Some(min) = min
        && length < min
    {
        violated.push("min_length");
    }
    if let Some(max) = max
        && length > max
    {
        violated.push("max_length");
    }
    violated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_inclusive() {
        assert!(check_number_range(6.2, 6.2, 7.5).is_empty());
        assert!(check_number_range(7.5, 6.2, 7.5).is_empty());
        assert_eq!(check_number_range(6.19, 6.2, 7.5), vec!["min"]);
        assert_eq!(check_number_range(7.51, 6.2, 7.5), vec!["max"]);
    }

    #[test]
    fn inverted_bounds_report_both() {
        assert_eq!(check_number_range(5.0, 10.0, 1.0), vec!["min", "max"]);
    }

    #[test]
    fn length_counts_characters() {
        assert!(check_length("Zoë B", Some(5), Some(80)).is_empty());
        assert_eq!(check_length("Jo", Some(5), Some(80)), vec!["min_length"]);
        assert_eq!(check_length(&"x".repeat(81), Some(5), Some(80)), vec!["max_length"]);
        assert!(check_length("", None, None).is_empty());
    }
}
