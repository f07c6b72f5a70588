//! Natural (human) ordering for version strings.
//!
//! Version identifiers in image definitions are free-form strings; ordering
//! them lexically would sort "10" before "9". Digit runs are compared by
//! numeric value, everything else byte-wise, so `["2", "10", "1"]` sorts to
//! `["1", "2", "10"]`.

use std::cmp::Ordering;

/// Compare two strings using natural ordering.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ca = a.chars().peekable();
    let mut cb = b.chars().peekable();

    loop {
        match (ca.peek().copied(), cb.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                if x.is_ascii_digit() && y.is_ascii_digit() {
                    let da = take_digits(&mut ca);
                    let db = take_digits(&mut cb);
                    match cmp_digit_runs(&da, &db) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                match x.cmp(&y) {
                    Ordering::Equal => {
                        ca.next();
                        cb.next();
                    }
                    other => return other,
                }
            }
        }
    }
}

/// Sort a list of version identifiers in natural ascending order.
pub fn natural_sort<S: AsRef<str>>(items: &mut [S]) {
    items.sort_by(|a, b| natural_cmp(a.as_ref(), b.as_ref()));
}

/// Return a naturally-sorted copy of the given identifiers.
pub fn natural_sorted<S: AsRef<str>>(items: &[S]) -> Vec<String> {
    let mut sorted: Vec<String> = items.iter().map(|s| s.as_ref().to_string()).collect();
    natural_sort(&mut sorted);
    sorted
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek() {
        if c.is_ascii_digit() {
            run.push(*c);
            chars.next();
        } else {
            break;
        }
    }
    run
}

/// Compare two digit runs numerically without parsing into a fixed-width
/// integer (version strings may exceed u64).
fn cmp_digit_runs(a: &str, b: &str) -> Ordering {
    let ta = a.trim_start_matches('0');
    let tb = b.trim_start_matches('0');
    match ta.len().cmp(&tb.len()) {
        Ordering::Equal => match ta.cmp(tb) {
            // equal value, shorter run of leading zeros sorts first
            Ordering::Equal => a.len().cmp(&b.len()),
            other => other,
        },
        other => other,
    }
}
