//! Phone number comparison

use phonenumber::country::{self, Source};
use phonenumber::{Mode, PhoneNumber};

/// Minimal number of trailing digits which must agree when comparing unparsable numbers.
const MIN_MATCH_DIGITS: usize = 7;

/// Compares phone numbers ignoring formatting and international prefixes.
///
/// Numbers written without a country code (no leading `+` or international dialing prefix) are
/// interpreted in the `default_region`, if any.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PhoneMatcher {
    default_region: Option<country::Id>,
}

impl PhoneMatcher {
    pub fn new(default_region: Option<country::Id>) -> Self {
        Self { default_region }
    }

    /// Returns `true` if `a` and `b` designate the same subscriber.
    pub fn matches(&self, a: &str, b: &str) -> bool {
        match (self.parse(a), self.parse(b)) {
            (Some(a), Some(b)) => same_subscriber(&a, &b),
            _ => digits_match(a, b),
        }
    }

    fn parse(&self, s: &str) -> Option<PhoneNumber> {
        let stripped = strip_formatting(s);
        if stripped.is_empty() {
            return None;
        }
        let region = if stripped.starts_with('+') {
            None
        } else {
            self.default_region
        };
        phonenumber::parse(region, &stripped).ok()
    }
}

fn same_subscriber(a: &PhoneNumber, b: &PhoneNumber) -> bool {
    if a.national().value() != b.national().value() {
        return false;
    }
    // a number dialed without country code inherits it from the region, so it is not conclusive
    let implicit = |n: &PhoneNumber| matches!(n.code().source(), Source::Default);
    implicit(a) || implicit(b) || a.code().value() == b.code().value()
}

fn digits_match(a: &str, b: &str) -> bool {
    let a = significant_digits(a);
    let b = significant_digits(b);
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    short.len() >= MIN_MATCH_DIGITS && long.ends_with(short.as_str())
}

/// Digits of `s` without the national trunk prefix `0`
///
/// Numbers dialed with `+` or the international prefix `00` keep all their digits.
fn significant_digits(s: &str) -> String {
    let stripped = strip_formatting(s);
    let digits: String = stripped.chars().filter(char::is_ascii_digit).collect();
    let international = stripped.starts_with('+') || digits.starts_with("00");
    match digits.strip_prefix('0') {
        Some(national) if !international => national.to_owned(),
        _ => digits,
    }
}

fn strip_formatting(s: &str) -> String {
    s.trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')' | '/'))
        .collect()
}

/// Formats `s` as E.164 number, interpreting it in `region` when it has no country code.
pub fn format_e164(s: &str, region: Option<country::Id>) -> Option<String> {
    let number = PhoneMatcher::new(region).parse(s)?;
    Some(number.format().mode(Mode::E164).to_string())
}
