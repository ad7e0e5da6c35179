//! Encoding of environment and build variables for storage
//!
//! Variables are stored as space-separated `key=value` tokens, sorted by key
//! so the same map always encodes to the same string. Keys and values may not
//! contain whitespace or `=`; such input is rejected instead of being stored
//! in a form that would not decode back to the same map.

use std::collections::{BTreeMap, HashMap};

use crate::errors::DeployError;

/// Substrings that mark a variable as secret in log output
pub const SENSITIVE_KEYWORDS: [&str; 7] = [
    "password",
    "secret",
    "token",
    "key",
    "auth",
    "credential",
    "private",
];

const MASK: &str = "********";

/// Encode a variable map into its storage string
pub fn encode(variables: &HashMap<String, String>) -> Result<String, DeployError> {
    let sorted: BTreeMap<&String, &String> = variables.iter().collect();
    let mut tokens = Vec::with_capacity(sorted.len());

    for (key, value) in sorted {
        validate(key, value)?;
        tokens.push(format!("{}={}", key, value));
    }

    Ok(tokens.join(" "))
}

/// Decode a storage string back into a variable map
pub fn decode(encoded: &str) -> Result<HashMap<String, String>, DeployError> {
    let mut variables = HashMap::new();

    for token in encoded.split_whitespace() {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| DeployError::InvalidVariable(format!("missing '=' in {:?}", token)))?;
        if key.is_empty() || value.contains('=') {
            return Err(DeployError::InvalidVariable(format!(
                "malformed token {:?}",
                token
            )));
        }
        variables.insert(key.to_string(), value.to_string());
    }

    Ok(variables)
}

fn validate(key: &str, value: &str) -> Result<(), DeployError> {
    if key.is_empty() {
        return Err(DeployError::InvalidVariable("empty variable name".to_string()));
    }
    let has_separator = |s: &str| s.chars().any(|c| c == '=' || c.is_whitespace());
    if has_separator(key) {
        return Err(DeployError::InvalidVariable(format!(
            "name {:?} contains '=' or whitespace",
            key
        )));
    }
    if has_separator(value) {
        return Err(DeployError::InvalidVariable(format!(
            "value of {} contains '=' or whitespace",
            key
        )));
    }
    Ok(())
}

/// Case-insensitive substring match against [`SENSITIVE_KEYWORDS`]
pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEYWORDS.iter().any(|keyword| key.contains(keyword))
}

/// `KEY=value` entries for the container environment, sorted by key
pub fn env_list(variables: &HashMap<String, String>) -> Vec<String> {
    let sorted: BTreeMap<&String, &String> = variables.iter().collect();
    sorted
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect()
}

/// Same as [`env_list`] with secret values replaced, for log output only
pub fn masked_env_list(variables: &HashMap<String, String>) -> Vec<String> {
    env_list(variables)
        .iter()
        .map(|entry| mask_env_entry(entry))
        .collect()
}

/// Mask a single `KEY=value` entry if its key is sensitive
pub fn mask_env_entry(entry: &str) -> String {
    match entry.split_once('=') {
        Some((key, _)) if is_sensitive_key(key) => format!("{}={}", key, MASK),
        _ => entry.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_encode_is_sorted_and_deterministic() {
        let variables = vars(&[("PORT", "3000"), ("NODE_ENV", "production"), ("A", "")]);
        assert_eq!(
            encode(&variables).unwrap(),
            "A= NODE_ENV=production PORT=3000"
        );
    }

    #[test]
    fn test_round_trip() {
        let variables = vars(&[
            ("DATABASE_URL", "postgres://db:5432/app"),
            ("FEATURE_FLAGS", "a,b,c"),
            ("EMPTY", ""),
        ]);
        let decoded = decode(&encode(&variables).unwrap()).unwrap();
        assert_eq!(decoded, variables);

        assert!(decode("").unwrap().is_empty());
        assert!(decode(&encode(&HashMap::new()).unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_separator_values_are_rejected() {
        assert!(matches!(
            encode(&vars(&[("GREETING", "hello world")])),
            Err(DeployError::InvalidVariable(_))
        ));
        assert!(matches!(
            encode(&vars(&[("QUERY", "a=b")])),
            Err(DeployError::InvalidVariable(_))
        ));
        assert!(matches!(
            encode(&vars(&[("", "x")])),
            Err(DeployError::InvalidVariable(_))
        ));
    }

    #[test]
    fn test_decode_rejects_malformed_tokens() {
        assert!(decode("A=1 B").is_err());
        assert!(decode("A=1=2").is_err());
        assert!(decode("=1").is_err());
    }

    #[test]
    fn test_sensitive_keys() {
        assert!(is_sensitive_key("DB_PASSWORD"));
        assert!(is_sensitive_key("github_Token"));
        assert!(is_sensitive_key("API_KEY"));
        assert!(is_sensitive_key("OAUTH_CALLBACK"));
        assert!(is_sensitive_key("PRIVATE_URL"));
        assert!(!is_sensitive_key("PORT"));
        assert!(!is_sensitive_key("NODE_ENV"));
    }

    #[test]
    fn test_masked_env_list() {
        let variables = vars(&[("DB_PASSWORD", "x"), ("PORT", "3000")]);

        let masked = masked_env_list(&variables);
        assert_eq!(masked, vec!["DB_PASSWORD=********", "PORT=3000"]);

        let real = env_list(&variables);
        assert_eq!(real, vec!["DB_PASSWORD=x", "PORT=3000"]);
    }
}
