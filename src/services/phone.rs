//! Phone numbers are stored and compared in one canonical form: digits only,
//! country code included (`15551234567`).

pub fn digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Canonicalises a typed or stored number. Ten-digit numbers get the North
/// American country code; fewer than ten digits is not a dialable number.
/// Applying it twice gives the same result as applying it once.
pub fn normalize(raw: &str) -> Option<String> {
    let d = digits(raw);
    match d.len() {
        0..=9 => None,
        10 => Some(format!("1{d}")),
        _ => Some(d),
    }
}

/// `+15551234567`, for dialing. Accepts stored numbers in any format.
pub fn to_e164(number: &str) -> String {
    let canonical = normalize(number).unwrap_or_else(|| digits(number));
    format!("+{canonical}")
}

fn word_digit(word: &str) -> Option<char> {
    let digit = match word {
        "zero" | "oh" | "cero" => '0',
        "one" | "uno" | "una" => '1',
        "two" | "dos" => '2',
        "three" | "tres" => '3',
        "four" | "cuatro" => '4',
        "five" | "cinco" => '5',
        "six" | "seis" => '6',
        "seven" | "siete" => '7',
        "eight" | "ocho" => '8',
        "nine" | "nueve" => '9',
        _ => return None,
    };
    Some(digit)
}

fn repeat_count(word: &str) -> Option<usize> {
    match word {
        "double" | "doble" => Some(2),
        "triple" => Some(3),
        _ => None,
    }
}

/// Extracts the digit sequence from a speech transcript such as
/// "five five five, one two three, double four six seven" or
/// "cinco cinco cinco 1234567". Unknown words are ignored.
pub fn spoken_digits(text: &str) -> String {
    let lower = text.to_lowercase();
    let mut out = String::new();
    let mut pending_repeat: Option<usize> = None;

    for token in lower
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | '-' | '(' | ')' | '+'))
        .filter(|t| !t.is_empty())
    {
        if let Some(n) = repeat_count(token) {
            pending_repeat = Some(n);
            continue;
        }

        let times = pending_repeat.take().unwrap_or(1);
        if token.chars().all(|c| c.is_ascii_digit()) {
            let mut chars = token.chars();
            if let Some(first) = chars.next() {
                for _ in 0..times {
                    out.push(first);
                }
                out.extend(chars);
            }
        } else if let Some(d) = word_digit(token) {
            for _ in 0..times {
                out.push(d);
            }
        }
    }
    out
}

/// Canonicalises a spoken number. Overlong captures keep the last ten digits.
pub fn normalize_spoken(text: &str) -> Option<String> {
    let d = spoken_digits(text);
    if d.len() > 11 {
        return normalize(&d[d.len() - 10..]);
    }
    normalize(&d)
}
