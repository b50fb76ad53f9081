//! Identifier generation helpers

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::types::via::BRANCH_MAGIC_COOKIE;

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// New RFC 3261 branch id (`z9hG4bK` + random suffix)
pub fn generate_branch() -> String {
    format!("{}{}", BRANCH_MAGIC_COOKIE, random_token(16))
}

/// New From/To tag
pub fn generate_tag() -> String {
    random_token(10)
}

/// New Call-ID, optionally qualified with a host
pub fn generate_call_id(host: Option<&str>) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    match host {
        Some(host) => format!("{}@{}", id, host),
        None => id,
    }
}

/// Canonical dialog key: `call-id:local-tag:remote-tag`, lower-cased
pub fn dialog_key(call_id: &str, local_tag: &str, remote_tag: &str) -> String {
    format!("{}:{}:{}", call_id, local_tag, remote_tag).to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_has_cookie_and_is_unique() {
        let a = generate_branch();
        let b = generate_branch();
        assert!(a.starts_with("z9hG4bK"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_dialog_key_is_case_folded() {
        assert_eq!(dialog_key("ABC@Host", "T1", "t2"), "abc@host:t1:t2");
    }
}
