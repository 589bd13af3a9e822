const SECRET_MARKERS: [&str; 6] = ["TOKEN", "PASSWORD", "KEY", "SECRET", "PASS", "PWD"];
const MASK_CHAR: char = '*';
pub const MASK_MAX_LEN: usize = 12;
pub const REDACTION: &str = "[REDACTED]";

/// Substring policy: any key mentioning a secret marker is treated as secret,
/// including false positives such as `MONKEY_COUNT`.
pub fn is_secret_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    SECRET_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// One `*` per character, capped at [`MASK_MAX_LEN`].
pub fn mask_value(value: &str) -> String {
    let len = value.chars().count().min(MASK_MAX_LEN);
    MASK_CHAR.to_string().repeat(len)
}

pub fn display_value(key: &str, value: &str) -> String {
    if is_secret_key(key) {
        mask_value(value)
    } else {
        value.to_string()
    }
}

/// Replaces every occurrence of a secret value inside `message`.
pub fn redact_message<'a>(
    message: &str,
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> String {
    let mut secrets = pairs
        .into_iter()
        .filter(|(key, value)| is_secret_key(key) && value.len() >= 4)
        .map(|(_, value)| value)
        .collect::<Vec<_>>();
    secrets.sort_by_key(|value| std::cmp::Reverse(value.len()));
    secrets
        .into_iter()
        .fold(message.to_string(), |acc, secret| acc.replace(secret, REDACTION))
}
