// Price rendering: rounded integer with `,` thousands separators.

/// Round to the nearest integer (ties to even) and group digits in threes,
/// e.g. `1234567.8` -> `"1,234,568"`.
pub fn group_thousands(value: f64) -> String {
    // `+ 0.0` folds the negative zero that values in [-0.5, 0] round to into `0`.
    let rounded = format!("{:.0}", value.round_ties_even() + 0.0);
    let (sign, digits) = match rounded.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", rounded.as_str()),
    };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{sign}{grouped}")
}

/// `"<grouped price> <currency>"`.
pub fn format_price(value: f64, currency: &str) -> String {
    format!("{} {currency}", group_thousands(value))
}
