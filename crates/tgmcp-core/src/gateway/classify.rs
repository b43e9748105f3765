//! Failure classification.
//!
//! Every remote or local failure ends up as one [`Failure`] whose [`ErrorKind`]
//! comes from a small closed set, so callers can match exhaustively. The
//! `message` is safe to show to a user; raw remote text stays in `detail`.

use std::{fmt, time::Duration};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{
    domain::OperationClass,
    ports::{RemoteError, RpcError},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    RateLimited,
    Unsupported,
    TransientError,
    InvalidArgument,
    ResultTooLarge,
    AllStrategiesFailed,
    Unknown,
}

impl ErrorKind {
    pub fn default_message(self) -> &'static str {
        match self {
            Self::NotFound => "The requested chat, user or message could not be found.",
            Self::PermissionDenied => "You don't have permission to do that in this chat.",
            Self::RateLimited => "Telegram is rate limiting this action. Try again later.",
            Self::Unsupported => "This action is not available for this account.",
            Self::TransientError => "Telegram could not be reached. Try again in a moment.",
            Self::InvalidArgument => "The request was not valid.",
            Self::ResultTooLarge => "The result is too large to list. Narrow the request.",
            Self::AllStrategiesFailed => "None of the available methods for this action succeeded.",
            Self::Unknown => "An unexpected error occurred.",
        }
    }

    /// Whether the failure may go away on retry (after a wait, or with another strategy).
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Unsupported | Self::TransientError
        )
    }

    /// Kinds the fallback executor recovers from by moving to the next strategy.
    pub fn continues_chain(self) -> bool {
        matches!(self, Self::Unsupported | Self::TransientError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::RateLimited => "rate_limited",
            Self::Unsupported => "unsupported",
            Self::TransientError => "transient_error",
            Self::InvalidArgument => "invalid_argument",
            Self::ResultTooLarge => "result_too_large",
            Self::AllStrategiesFailed => "all_strategies_failed",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A classified failure. `message` is user-safe; `detail` is for logs only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    pub retry_after: Option<Duration>,
    pub detail: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.default_retryable(),
            retry_after: None,
            detail: String::new(),
        }
    }

    pub fn of_kind(kind: ErrorKind) -> Self {
        Self::new(kind, kind.default_message())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        let message = match retry_after {
            Some(d) => format!(
                "Telegram is rate limiting this action. Try again in {} seconds.",
                d.as_secs().max(1)
            ),
            None => ErrorKind::RateLimited.default_message().to_string(),
        };
        Self {
            retry_after,
            ..Self::new(ErrorKind::RateLimited, message)
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// True when the message carries nothing beyond the kind's default text.
    pub fn is_generic(&self) -> bool {
        self.message == self.kind.default_message()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Failure {}

/// Result of one logical operation: exactly one of success or failure.
pub type ExecutionOutcome<T = serde_json::Value> = std::result::Result<T, Failure>;

/// Remote names with a dedicated kind and user-safe message.
const KNOWN_NAMES: &[(&str, ErrorKind, &str)] = &[
    // Capability absent on this account / protocol version.
    ("METHOD_INVALID", ErrorKind::Unsupported, "This action is not available for this account."),
    ("BOT_METHOD_INVALID", ErrorKind::Unsupported, "This action is not available for bot accounts."),
    ("USER_BOT_REQUIRED", ErrorKind::Unsupported, "This action is only available for bot accounts."),
    ("USER_BOT_INVALID", ErrorKind::Unsupported, "This action is only available for bot accounts."),
    ("API_METHOD_NOT_SUPPORTED", ErrorKind::Unsupported, "This action is not supported by the connected client."),
    // Missing entities.
    ("PEER_ID_INVALID", ErrorKind::NotFound, "That chat or user could not be found."),
    ("CHANNEL_INVALID", ErrorKind::NotFound, "That channel could not be found."),
    ("CHAT_ID_INVALID", ErrorKind::NotFound, "That chat could not be found."),
    ("USER_ID_INVALID", ErrorKind::NotFound, "That user could not be found."),
    ("MSG_ID_INVALID", ErrorKind::NotFound, "That message could not be found."),
    ("MESSAGE_ID_INVALID", ErrorKind::NotFound, "That message could not be found."),
    ("USERNAME_NOT_OCCUPIED", ErrorKind::NotFound, "No one is using that username."),
    ("USERNAME_INVALID", ErrorKind::NotFound, "That username could not be found."),
    ("PHONE_NOT_OCCUPIED", ErrorKind::NotFound, "No account uses that phone number."),
    ("INVITE_HASH_EXPIRED", ErrorKind::NotFound, "The invite link has expired."),
    ("INVITE_HASH_INVALID", ErrorKind::NotFound, "The invite link is invalid."),
    // Permissions.
    ("CHAT_ADMIN_REQUIRED", ErrorKind::PermissionDenied, "You need to be an admin of this chat to do that."),
    ("CHAT_WRITE_FORBIDDEN", ErrorKind::PermissionDenied, "You can't write in this chat."),
    ("CHAT_FORBIDDEN", ErrorKind::PermissionDenied, "You don't have access to this chat."),
    ("CHANNEL_PRIVATE", ErrorKind::PermissionDenied, "This channel is private or you were removed from it."),
    ("USER_PRIVACY_RESTRICTED", ErrorKind::PermissionDenied, "The user's privacy settings don't allow this."),
    ("USER_NOT_MUTUAL_CONTACT", ErrorKind::PermissionDenied, "The user must be a mutual contact for this action."),
    ("USER_BANNED_IN_CHANNEL", ErrorKind::PermissionDenied, "You are restricted from sending in this chat."),
    ("RIGHT_FORBIDDEN", ErrorKind::PermissionDenied, "You can't grant rights you don't have."),
    ("USERS_TOO_MUCH", ErrorKind::PermissionDenied, "This chat has reached its member limit."),
    ("INVITE_REQUEST_SENT", ErrorKind::PermissionDenied, "Joining this chat requires admin approval. A request was sent."),
    // Malformed input the remote side caught.
    ("MESSAGE_EMPTY", ErrorKind::InvalidArgument, "The message is empty."),
    ("MESSAGE_TOO_LONG", ErrorKind::InvalidArgument, "The message is too long."),
    ("MESSAGE_NOT_MODIFIED", ErrorKind::InvalidArgument, "The new text is the same as the current text."),
    ("USER_ALREADY_PARTICIPANT", ErrorKind::InvalidArgument, "You are already a member of this chat."),
    // Remote-side hiccups.
    ("RPC_CALL_FAIL", ErrorKind::TransientError, "Telegram had a temporary problem. Try again."),
    ("RPC_MCGET_FAIL", ErrorKind::TransientError, "Telegram had a temporary problem. Try again."),
    ("TIMEOUT", ErrorKind::TransientError, "Telegram took too long to answer. Try again."),
];

const RATE_LIMIT_NAMES: &[&str] = &[
    "FLOOD_WAIT",
    "SLOWMODE_WAIT",
    "FLOOD_PREMIUM_WAIT",
    "FLOOD_TEST_PHONE_WAIT",
];

/// Map a raw remote/local failure onto the closed taxonomy.
pub fn classify(err: &RemoteError) -> Failure {
    let failure = match err {
        RemoteError::Rpc(rpc) => classify_rpc(rpc),
        RemoteError::Timeout => Failure::new(
            ErrorKind::TransientError,
            "Telegram took too long to answer. Try again.",
        ),
        RemoteError::Connection(_) => Failure::of_kind(ErrorKind::TransientError),
        RemoteError::Unavailable(_) | RemoteError::Malformed(_) => {
            Failure::of_kind(ErrorKind::Unsupported)
        }
        // Local validation text is written by us and safe to surface.
        RemoteError::Invalid(msg) => Failure::invalid(msg.clone()),
    };
    failure.with_detail(err.to_string())
}

fn classify_rpc(rpc: &RpcError) -> Failure {
    if RATE_LIMIT_NAMES.iter().any(|n| rpc.is(n)) {
        return Failure::rate_limited(rpc.value.map(|v| Duration::from_secs(u64::from(v))));
    }
    if rpc.is("PEER_FLOOD") {
        return Failure::new(
            ErrorKind::RateLimited,
            "Telegram limits this account right now. Try again later.",
        );
    }

    if let Some((_, kind, msg)) = KNOWN_NAMES.iter().find(|(n, _, _)| rpc.is(n)) {
        return Failure::new(*kind, *msg);
    }

    if let Some(f) = classify_text(rpc) {
        return f;
    }

    if rpc.is("INTERNAL*") || rpc.is("*_FAIL") {
        return Failure::of_kind(ErrorKind::TransientError);
    }
    if rpc.is("*_EMPTY") || rpc.is("*_TOO_LONG") || rpc.is("*_INVALID") {
        return Failure::of_kind(ErrorKind::InvalidArgument);
    }

    match rpc.code {
        420 | 429 => Failure::rate_limited(rpc.value.map(|v| Duration::from_secs(u64::from(v)))),
        401 | 403 => Failure::of_kind(ErrorKind::PermissionDenied),
        404 | 501 => Failure::of_kind(ErrorKind::Unsupported),
        c if c >= 500 || c == -503 || c == -500 => Failure::of_kind(ErrorKind::TransientError),
        _ => Failure::of_kind(ErrorKind::Unknown),
    }
}

/// Heuristics over human text, for bridges that only report prose.
fn classify_text(rpc: &RpcError) -> Option<Failure> {
    let text = rpc.text.to_lowercase();
    if text.is_empty() {
        return None;
    }

    if text.contains("too many requests") || text.contains("retry after") {
        let wait = rpc.value.or_else(|| trailing_number(&text));
        return Some(Failure::rate_limited(
            wait.map(|v| Duration::from_secs(u64::from(v))),
        ));
    }
    if text.contains("not available")
        || text.contains("not supported")
        || text.contains("method not found")
        || text.contains("no such method")
    {
        return Some(Failure::of_kind(ErrorKind::Unsupported));
    }
    if text.contains("expired") && text.contains("invite") {
        return Some(Failure::new(ErrorKind::NotFound, "The invite link has expired."));
    }
    if text.contains("already") && (text.contains("participant") || text.contains("member")) {
        return Some(Failure::invalid("You are already a member of this chat."));
    }
    if text.contains("too much") || text.contains("too many members") {
        return Some(Failure::new(
            ErrorKind::PermissionDenied,
            "This chat has reached its member limit.",
        ));
    }
    if text.contains("not found") {
        return Some(Failure::of_kind(ErrorKind::NotFound));
    }
    if text.contains("forbidden") || text.contains("not enough rights") || text.contains("admin")
    {
        return Some(Failure::of_kind(ErrorKind::PermissionDenied));
    }
    None
}

fn trailing_number(text: &str) -> Option<u32> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .last()
        .and_then(|s| s.parse().ok())
}

/// Stable short code for operator log correlation, e.g. `MSG-ERR-417`.
pub fn error_code(class: OperationClass, operation: &str) -> String {
    let digest = Sha256::digest(operation.as_bytes());
    let n = u16::from_be_bytes([digest[0], digest[1]]) % 1000;
    format!("{}-ERR-{n:03}", class.error_prefix())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc(code: i32, name: &str) -> RemoteError {
        RemoteError::Rpc(RpcError::from_remote(code, name))
    }

    fn prose(code: i32, text: &str) -> RemoteError {
        RemoteError::Rpc(RpcError::from_remote(code, "").with_text(text))
    }

    #[test]
    fn flood_wait_carries_wait_seconds() {
        let f = classify(&rpc(420, "FLOOD_WAIT_30"));
        assert_eq!(f.kind, ErrorKind::RateLimited);
        assert!(f.retryable);
        assert_eq!(f.retry_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn bot_style_429_uses_retry_after() {
        let err = RemoteError::Rpc(
            RpcError::from_remote(429, "")
                .with_text("Too Many Requests: retry after 12")
                .with_value(None),
        );
        let f = classify(&err);
        assert_eq!(f.kind, ErrorKind::RateLimited);
        assert_eq!(f.retry_after, Some(Duration::from_secs(12)));
    }

    #[test]
    fn table_rows_map_to_expected_kinds() {
        let cases = [
            (rpc(400, "METHOD_INVALID"), ErrorKind::Unsupported, true),
            (rpc(400, "PEER_ID_INVALID"), ErrorKind::NotFound, false),
            (rpc(403, "CHAT_ADMIN_REQUIRED"), ErrorKind::PermissionDenied, false),
            (RemoteError::Timeout, ErrorKind::TransientError, true),
            (
                RemoteError::Connection("reset by peer".into()),
                ErrorKind::TransientError,
                true,
            ),
            (
                RemoteError::Invalid("page must be >= 1".into()),
                ErrorKind::InvalidArgument,
                false,
            ),
            (rpc(400, "SOMETHING_WEIRD"), ErrorKind::Unknown, false),
        ];
        for (err, kind, retryable) in cases {
            let f = classify(&err);
            assert_eq!(f.kind, kind, "{err}");
            assert_eq!(f.retryable, retryable, "{err}");
        }
    }

    #[test]
    fn generic_suffixes_are_invalid_arguments() {
        assert_eq!(
            classify(&rpc(400, "PHOTO_CROP_SIZE_SMALL_INVALID")).kind,
            ErrorKind::InvalidArgument
        );
        assert_eq!(classify(&rpc(400, "TITLE_EMPTY")).kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn prose_errors_are_recognized() {
        assert_eq!(
            classify(&prose(400, "Bad Request: chat not found")).kind,
            ErrorKind::NotFound
        );
        assert_eq!(
            classify(&prose(403, "Forbidden: bot was kicked from the group chat")).kind,
            ErrorKind::PermissionDenied
        );
        let f = classify(&prose(400, "The invite hash has expired"));
        assert_eq!(f.kind, ErrorKind::NotFound);
        assert_eq!(f.message, "The invite link has expired.");
    }

    #[test]
    fn server_errors_are_transient() {
        assert_eq!(classify(&rpc(500, "WORKER_BUSY")).kind, ErrorKind::TransientError);
        assert_eq!(classify(&rpc(-503, "")).kind, ErrorKind::TransientError);
    }

    #[test]
    fn user_message_never_contains_raw_remote_text() {
        let f = classify(&prose(400, "Bad Request: chat not found (internal shard 7)"));
        assert!(!f.message.contains("shard"));
        assert!(f.detail.contains("shard"));
    }

    #[test]
    fn peer_flood_is_rate_limited_without_wait() {
        let f = classify(&rpc(400, "PEER_FLOOD"));
        assert_eq!(f.kind, ErrorKind::RateLimited);
        assert_eq!(f.retry_after, None);
    }

    #[test]
    fn error_codes_are_stable_and_prefixed() {
        let a = error_code(OperationClass::Messaging, "send_message");
        let b = error_code(OperationClass::Messaging, "send_message");
        assert_eq!(a, b);
        assert!(a.starts_with("MSG-ERR-"));
        assert_eq!(a.len(), "MSG-ERR-000".len());
    }
}
