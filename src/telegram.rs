//! Extraction of the Telegram user identifier from Mini App init data.
//!
//! Init data arrives as a percent-encoded querystring whose `user` field is
//! a JSON object. Signature verification of the payload is the platform
//! SDK's concern; this module only pulls out a non-empty opaque id.

use anyhow::{Result, anyhow};
use serde_json::Value;

pub const MAX_INIT_DATA_LEN: usize = 8192;
pub const MAX_USER_ID_LEN: usize = 64;

/// Header carrying the raw init data from the Mini App front-end.
pub const INIT_DATA_HEADER: &str = "x-telegram-init-data";

/// Pulls the user id out of a raw init-data querystring.
pub fn extract_user_id(init_data: &str) -> Result<String> {
    let trimmed = init_data.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Init data cannot be empty"));
    }
    if trimmed.len() > MAX_INIT_DATA_LEN {
        return Err(anyhow!("Init data exceeds {MAX_INIT_DATA_LEN} byte limit"));
    }

    let user_raw = trimmed
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find_map(|(key, value)| {
            let key = urlencoding::decode(key).ok()?;
            (key == "user").then_some(value)
        })
        .ok_or_else(|| anyhow!("Init data carries no user field"))?;

    let user_json = urlencoding::decode(user_raw)
        .map_err(|err| anyhow!("Failed to percent-decode user field: {err}"))?;
    let user: Value = serde_json::from_str(&user_json)
        .map_err(|err| anyhow!("Failed to parse user field as JSON: {err}"))?;

    let id = match user.get("id") {
        Some(Value::Number(id)) => id.to_string(),
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        _ => return Err(anyhow!("User field carries no id")),
    };
    sanitize_user_id(&id)
}

/// Normalizes a caller-supplied user id into the opaque key the store uses.
pub fn sanitize_user_id(value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("User id cannot be empty"));
    }
    if trimmed.len() > MAX_USER_ID_LEN {
        return Err(anyhow!("User id exceeds {MAX_USER_ID_LEN} character limit"));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_numeric_id_from_encoded_user() {
        let init_data = "query_id=AAH&user=%7B%22id%22%3A123456789%2C%22first_name%22%3A%22Ann%22%7D&auth_date=1700000000&hash=abc";
        let id = extract_user_id(init_data).expect("user id extracted");
        assert_eq!(id, "123456789");
    }

    #[test]
    fn extracts_string_id() {
        let init_data = "user=%7B%22id%22%3A%22u-42%22%7D";
        assert_eq!(extract_user_id(init_data).expect("extracted"), "u-42");
    }

    #[test]
    fn rejects_missing_user_field() {
        let err = extract_user_id("auth_date=1700000000&hash=abc").expect_err("no user");
        assert!(err.to_string().contains("no user field"));
    }

    #[test]
    fn rejects_malformed_user_json() {
        assert!(extract_user_id("user=%7Bnot-json").is_err());
    }

    #[test]
    fn rejects_user_without_id() {
        assert!(extract_user_id("user=%7B%22first_name%22%3A%22Ann%22%7D").is_err());
    }

    #[test]
    fn rejects_empty_init_data() {
        assert!(extract_user_id("   ").is_err());
    }

    #[test]
    fn sanitize_trims_and_bounds() {
        assert_eq!(sanitize_user_id("  42 ").expect("trimmed"), "42");
        assert!(sanitize_user_id("").is_err());
        let too_long = "9".repeat(MAX_USER_ID_LEN + 1);
        assert!(sanitize_user_id(&too_long).is_err());
    }
}
