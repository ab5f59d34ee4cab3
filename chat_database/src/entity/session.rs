use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::entity::Entity;

/// Length of a generated session identifier
pub const SESSION_ID_LEN: usize = 32;

/// Server side record of a browser session, keyed by the identifier carried in the session cookie.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Session {
    pub id: String,
    /// Display name chosen on the login prompt
    pub user: Option<String>,
    /// Unix timestamp in seconds, `None` when the session never expires
    pub expires_at: Option<u64>,
}

impl Session {
    /// A fresh session with a random identifier.
    pub fn new(user: Option<String>) -> Self {
        Session {
            id: Session::generate_id(),
            user,
            expires_at: None,
        }
    }

    pub fn generate_id() -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_ID_LEN)
            .collect()
    }

    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    /// Set the expiry `ttl_secs` from now, `0` disables expiry.
    pub fn touch(&mut self, ttl_secs: u32) {
        self.expires_at = if ttl_secs == 0 {
            None
        } else {
            Some(unix_now() + ttl_secs as u64)
        };
    }

    /// Extract the session identifier from a `Cookie` request header.
    /// Values that could not have been issued by [`Session::generate_id`] are ignored.
    pub fn id_from_cookie_header(header: &str, cookie_name: &str) -> Option<String> {
        header
            .split(';')
            .filter_map(|pair| {
                let mut parts = pair.trim().splitn(2, '=');
                match (parts.next(), parts.next()) {
                    (Some(name), Some(value)) if name == cookie_name => Some(value.trim()),
                    _ => None,
                }
            })
            .find(|value| is_valid_id(value))
            .map(str::to_string)
    }
}

impl Entity for Session {
    fn get_key(&self) -> Vec<u8> {
        self.id.as_bytes().to_vec()
    }

    const COLLECTION: &'static str = "sessions";
}

fn is_valid_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 64
        && value.chars().all(|c| c.is_ascii_alphanumeric())
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::{Session, SESSION_ID_LEN};

    #[test]
    fn generated_ids_are_unique_and_alphanumeric() {
        let first = Session::new(None);
        let second = Session::new(None);

        assert_ne!(first.id, second.id);
        assert_eq!(first.id.len(), SESSION_ID_LEN);
        assert!(first.id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn should_find_session_cookie_among_others() {
        let header = "theme=dark; jsessionid=abc123; lang=fr";

        let id = Session::id_from_cookie_header(header, "jsessionid");

        assert_eq!(id, Some("abc123".to_string()));
    }

    #[test]
    fn should_ignore_forged_or_missing_cookie() {
        assert_eq!(
            Session::id_from_cookie_header("jsessionid=../etc/passwd", "jsessionid"),
            None
        );
        assert_eq!(Session::id_from_cookie_header("jsessionid=", "jsessionid"), None);
        assert_eq!(Session::id_from_cookie_header("sid=abc", "jsessionid"), None);
        assert_eq!(Session::id_from_cookie_header("", "jsessionid"), None);
    }

    #[test]
    fn touch_sets_and_clears_expiry() {
        let mut session = Session::new(Some("alice".to_string()));

        session.touch(60);
        assert!(session.expires_at.is_some());
        assert!(!session.is_expired(super::unix_now()));

        session.touch(0);
        assert_eq!(session.expires_at, None);
        assert!(!session.is_expired(u64::MAX));
    }
}
