use chrono::{DateTime, Utc};
use rand::Rng;

const RANDOM_MIN: u128 = 100_000_000_000_000_000_000;
const RANDOM_MAX: u128 = 1_000_000_000_000_000_000_000;

/// Generates a session id of the form `<base36 millis>.<base36 random>`.
///
/// The first part encodes the creation time so [`describe_sid`] can
/// recover it.
pub fn generate_sid() -> String {
    let millis = u128::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
    let random = rand::thread_rng().gen_range(RANDOM_MIN..RANDOM_MAX);

    format!("{}.{}", to_base36(millis), to_base36(random))
}

/// Recovers the creation instant encoded in a sid produced by [`generate_sid`].
///
/// Returns `None` when the timestamp part is missing or not base36.
pub fn describe_sid(sid: &str) -> Option<DateTime<Utc>> {
    let date_part = sid.split('.').next().filter(|part| !part.is_empty())?;
    let millis = i64::from_str_radix(date_part, 36).ok()?;

    DateTime::from_timestamp_millis(millis)
}

fn to_base36(mut value: u128) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_string();
    }

    let mut encoded = Vec::new();
    while value > 0 {
        encoded.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    encoded.reverse();

    String::from_utf8_lossy(&encoded).into_owned()
}
