use std::fmt::{self, Display};

/// Decides whether a received line is the one an expectation waits for.
///
/// Plain strings match by case-sensitive substring containment, [`regex::Regex`] by search, and
/// [`Predicate`] wraps any closure. `Display` is used in logs and error messages.
pub trait Pattern: Display + Send + Sync {
    fn matches(&self, line: &str) -> bool;
}

impl Pattern for str {
    fn matches(&self, line: &str) -> bool {
        line.contains(self)
    }
}

impl Pattern for String {
    fn matches(&self, line: &str) -> bool {
        line.contains(self.as_str())
    }
}

impl Pattern for regex::Regex {
    fn matches(&self, line: &str) -> bool {
        self.is_match(line)
    }
}

impl<P: Pattern + ?Sized> Pattern for &P {
    fn matches(&self, line: &str) -> bool {
        (**self).matches(line)
    }
}

/// A named closure used as a pattern
pub struct Predicate<F> {
    description: String,
    test: F,
}

impl<F: Fn(&str) -> bool + Send + Sync> Predicate<F> {
    pub fn new(description: impl Into<String>, test: F) -> Self {
        Self { description: description.into(), test }
    }
}

impl<F: Fn(&str) -> bool + Send + Sync> Pattern for Predicate<F> {
    fn matches(&self, line: &str) -> bool {
        (self.test)(line)
    }
}

impl<F> Display for Predicate<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("LE conn param updated", "LE conn param updated: int 0x0028 lat 0 to 42", true)]
    #[test_case("LE conn param updated:", "LE conn param updated int 0x0028", false)]
    #[test_case("Advertiser", "advertiser[0] 0x20001234 set started", false ; "case sensitive")]
    #[test_case("", "anything", true ; "empty pattern")]
    fn substring(pattern: &str, line: &str, expected: bool) {
        assert_eq!(Pattern::matches(pattern, line), expected);
        assert_eq!(Pattern::matches(&pattern.to_string(), line), expected);
    }

    #[test]
    fn regex() {
        let pattern = regex::Regex::new(r"Created adv id: \d+").unwrap();
        assert!(pattern.matches("Created adv id: 0, adv: 0x20001234"));
        assert!(!pattern.matches("Created adv id: x"));
        assert_eq!(pattern.to_string(), r"Created adv id: \d+");
    }

    #[test]
    fn predicate() {
        let pattern = Predicate::new("rssi above -60", |line: &str| {
            line.strip_prefix("rssi ").and_then(|v| v.parse::<i32>().ok()).is_some_and(|v| v > -60)
        });
        assert!(pattern.matches("rssi -42"));
        assert!(!pattern.matches("rssi -80"));
        assert_eq!(pattern.to_string(), "rssi above -60");
    }
}
