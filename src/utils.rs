use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Integer(i64),
    Float(f64),
}

/// Accepts `"123"`, `123` or `null` and yields a trimmed, non-empty string.
///
/// The bot platform that posts referrals sends Telegram ids either as numbers
/// or strings depending on how the webhook was configured.
pub fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<StringOrNumber>::deserialize(deserializer)?;

    let value = match value {
        Some(StringOrNumber::String(s)) => s,
        Some(StringOrNumber::Integer(n)) => n.to_string(),
        Some(StringOrNumber::Float(n)) => n.to_string(),
        None => return Ok(None),
    };

    Ok(non_empty(value))
}

/// Accepts `19.99` or `"19.99"`. Blank strings and `null` yield `None`.
pub fn opt_number_or_string<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<StringOrNumber>::deserialize(deserializer)?;

    match value {
        Some(StringOrNumber::Integer(n)) => Ok(Some(n as f64)),
        Some(StringOrNumber::Float(n)) => Ok(Some(n)),
        Some(StringOrNumber::String(s)) => match s.trim() {
            "" => Ok(None),
            trimmed => trimmed
                .parse::<f64>()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("invalid number: {trimmed:?}"))),
        },
        None => Ok(None),
    }
}

pub fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();

    if trimmed.is_empty() {
        None
    } else if trimmed.len() == value.len() {
        Some(value)
    } else {
        Some(trimmed.to_string())
    }
}

/// Escapes `%`, `_` and `\` so user input can be embedded in a LIKE pattern.
pub fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
