//! Device-code flow primitives.
//!
//! A headless CLI requests a device code, shows the human-readable user
//! code, and polls while the user approves the code in an authenticated
//! browser session. Sessions are single-use: the successful poll consumes
//! the session row.
//!
//! State machine: `pending → approved → consumed` (row deleted) or
//! `pending → denied`, with expiry checked lazily on every poll.
//!
//! This module holds the database-free pieces: code generation and the
//! poll decision. Session persistence lives with the server's repository.

use aes_gcm::aead::{OsRng, rand_core::RngCore};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Alphabet for user codes. Excludes visually ambiguous glyphs
/// (`0`/`O`, `1`/`I`/`L`) so the code survives being read off a terminal.
pub const USER_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Characters per user-code group (`XXXX-XXXX`).
const USER_CODE_GROUP_LEN: usize = 4;

/// Device-code session lifetime, in seconds.
pub const DEVICE_CODE_TTL_SECS: i64 = 600;

/// Polling interval the CLI is told to honor, in seconds.
pub const POLL_INTERVAL_SECS: u64 = 2;

/// Generate an opaque device code (the CLI-side session handle).
#[must_use]
pub fn generate_device_code() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a human-readable user code: two 4-character groups drawn from
/// [`USER_CODE_ALPHABET`], joined by a hyphen (`XXXX-XXXX`, 9 chars total).
#[must_use]
pub fn generate_user_code() -> String {
    let mut bytes = [0u8; USER_CODE_GROUP_LEN * 2];
    OsRng.fill_bytes(&mut bytes);

    let mut code = String::with_capacity(USER_CODE_GROUP_LEN * 2 + 1);
    for (i, byte) in bytes.iter().enumerate() {
        if i == USER_CODE_GROUP_LEN {
            code.push('-');
        }
        let idx = usize::from(*byte) % USER_CODE_ALPHABET.len();
        code.push(char::from(USER_CODE_ALPHABET[idx]));
    }
    code
}

/// Whether a submitted user code has the expected `XXXX-XXXX` shape.
///
/// Cheap pre-check before the database lookup; case-normalization is the
/// caller's business.
#[must_use]
pub fn user_code_format_is_valid(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() == USER_CODE_GROUP_LEN * 2 + 1
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| {
                if i == USER_CODE_GROUP_LEN {
                    *b == b'-'
                } else {
                    USER_CODE_ALPHABET.contains(b)
                }
            })
}

/// Stored status of a device-flow session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Approved,
    Denied,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            other => Err(format!("unknown device session status: {other}")),
        }
    }
}

/// Outcome of a token poll against a live session row.
///
/// `NotFound` (no row) is decided by the lookup, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Keep polling — the user has not acted yet.
    Pending,
    /// The session outlived its TTL.
    Expired,
    /// The user denied the request.
    Denied,
    /// Approved: issue tokens for this user and consume the session.
    Approved { user_id: Uuid },
}

/// Decide a poll from the session's stored state.
///
/// Expiry wins over status: an approved-but-expired session yields
/// [`PollDecision::Expired`]. An approved session that never got a user
/// bound (should not happen) stays pending rather than minting tokens for
/// nobody.
#[must_use]
pub fn decide_poll(
    status: SessionStatus,
    user_id: Option<Uuid>,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> PollDecision {
    if now > expires_at {
        return PollDecision::Expired;
    }
    match status {
        SessionStatus::Pending => PollDecision::Pending,
        SessionStatus::Denied => PollDecision::Denied,
        SessionStatus::Approved => match user_id {
            Some(user_id) => PollDecision::Approved { user_id },
            None => PollDecision::Pending,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn user_code_shape() {
        for _ in 0..64 {
            let code = generate_user_code();
            assert_eq!(code.len(), 9);
            assert_eq!(code.as_bytes()[4], b'-');
            for (i, b) in code.bytes().enumerate() {
                if i == 4 {
                    continue;
                }
                assert!(
                    USER_CODE_ALPHABET.contains(&b),
                    "unexpected character {} in {code}",
                    char::from(b)
                );
            }
        }
    }

    #[test]
    fn alphabet_excludes_ambiguous_glyphs() {
        for ambiguous in b"0O1IL" {
            assert!(!USER_CODE_ALPHABET.contains(ambiguous));
        }
    }

    #[test]
    fn format_check() {
        assert!(user_code_format_is_valid("ABCD-EFGH"));
        assert!(user_code_format_is_valid("2345-WXYZ"));
        assert!(!user_code_format_is_valid("ABCDEFGH"));
        assert!(!user_code_format_is_valid("ABCD-EFG"));
        assert!(!user_code_format_is_valid("AB0D-EFGH"));
        assert!(!user_code_format_is_valid("abcd-efgh"));
    }

    #[test]
    fn device_codes_are_unique() {
        assert_ne!(generate_device_code(), generate_device_code());
    }

    #[test]
    fn poll_pending() {
        let now = Utc::now();
        let decision = decide_poll(SessionStatus::Pending, None, now + Duration::minutes(5), now);
        assert_eq!(decision, PollDecision::Pending);
    }

    #[test]
    fn poll_expired_wins_over_status() {
        let now = Utc::now();
        let user = Uuid::from_u128(7);
        let expired_at = now - Duration::seconds(1);
        assert_eq!(
            decide_poll(SessionStatus::Approved, Some(user), expired_at, now),
            PollDecision::Expired
        );
        assert_eq!(
            decide_poll(SessionStatus::Pending, None, expired_at, now),
            PollDecision::Expired
        );
    }

    #[test]
    fn poll_denied() {
        let now = Utc::now();
        assert_eq!(
            decide_poll(SessionStatus::Denied, None, now + Duration::minutes(5), now),
            PollDecision::Denied
        );
    }

    #[test]
    fn poll_approved_needs_bound_user() {
        let now = Utc::now();
        let user = Uuid::from_u128(7);
        assert_eq!(
            decide_poll(
                SessionStatus::Approved,
                Some(user),
                now + Duration::minutes(5),
                now
            ),
            PollDecision::Approved { user_id: user }
        );
        assert_eq!(
            decide_poll(SessionStatus::Approved, None, now + Duration::minutes(5), now),
            PollDecision::Pending
        );
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            SessionStatus::Pending,
            SessionStatus::Approved,
            SessionStatus::Denied,
        ] {
            let parsed: SessionStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
