// Dotted-decimal seconds text form for the time and duration primitives
//
// Both primitives are signed nanosecond counts (since the Unix epoch for
// time). The text form is `[-]seconds[.fraction]` with up to nine
// fractional digits; the printer trims trailing zeros.

use crate::error::{DecodeError, Result};

const NS_PER_SEC: i128 = 1_000_000_000;

/// Parse `[-]seconds[.fraction]` into signed nanoseconds
pub fn parse_ns(text: &[u8]) -> Result<i64> {
    let bad = || DecodeError::Value(format!("invalid time literal {:?}", String::from_utf8_lossy(text)));
    let (neg, rest) = match text.split_first() {
        Some((&b'-', rest)) => (true, rest),
        _ => (false, text),
    };
    let mut parts = rest.splitn(2, |&b| b == b'.');
    let secs_digits = parts.next().ok_or_else(bad)?;
    let secs = digits_to_i128(secs_digits).ok_or_else(bad)?;

    let mut frac: i128 = 0;
    if let Some(frac_digits) = parts.next() {
        if frac_digits.len() > 9 {
            return Err(bad().into());
        }
        frac = digits_to_i128(frac_digits).ok_or_else(bad)?;
        frac *= 10i128.pow(9 - frac_digits.len() as u32);
    }

    let mut ns = secs.checked_mul(NS_PER_SEC).and_then(|s| s.checked_add(frac)).ok_or_else(bad)?;
    if neg {
        ns = -ns;
    }
    i64::try_from(ns).map_err(|_| bad().into())
}

fn digits_to_i128(digits: &[u8]) -> Option<i128> {
    if digits.is_empty() {
        return None;
    }
    digits.iter().try_fold(0i128, |acc, &b| {
        if !b.is_ascii_digit() {
            return None;
        }
        acc.checked_mul(10)?.checked_add(i128::from(b - b'0'))
    })
}

/// Format signed nanoseconds as `[-]seconds[.fraction]`, fraction trimmed
pub fn format_ns(ns: i64) -> String {
    let v = i128::from(ns);
    let sign = if v < 0 { "-" } else { "" };
    let abs = v.unsigned_abs();
    let secs = abs / NS_PER_SEC as u128;
    let frac = abs % NS_PER_SEC as u128;
    if frac == 0 {
        return format!("{}{}", sign, secs);
    }
    let mut frac_str = format!("{:09}", frac);
    while frac_str.ends_with('0') {
        frac_str.pop();
    }
    format!("{}{}.{}", sign, secs, frac_str)
}
