//! Ordered strategy chains and the executor that walks them.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    domain::{EntityHandle, OperationClass},
    ports::{RemoteConnection, RemoteError},
};

use super::{
    backoff::{BackoffController, CallMode},
    classify::{classify, ErrorKind, ExecutionOutcome, Failure},
};

/// Everything a strategy may look at: the connection, the resolved targets
/// (in request order) and the raw payload.
#[derive(Clone, Copy)]
pub struct StrategyContext<'a> {
    pub conn: &'a dyn RemoteConnection,
    pub targets: &'a [EntityHandle],
    pub payload: &'a Value,
}

impl<'a> StrategyContext<'a> {
    pub fn new(
        conn: &'a dyn RemoteConnection,
        targets: &'a [EntityHandle],
        payload: &'a Value,
    ) -> Self {
        Self {
            conn,
            targets,
            payload,
        }
    }

    pub fn target(&self, idx: usize) -> Result<&'a EntityHandle, RemoteError> {
        self.targets
            .get(idx)
            .ok_or_else(|| RemoteError::Invalid(format!("missing target #{}", idx + 1)))
    }

    pub fn opt_str(&self, key: &str) -> Option<&'a str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn str_arg(&self, key: &str) -> Result<&'a str, RemoteError> {
        self.opt_str(key)
            .ok_or_else(|| RemoteError::Invalid(format!("'{key}' is required")))
    }

    pub fn opt_i64(&self, key: &str) -> Option<i64> {
        self.payload.get(key).and_then(Value::as_i64)
    }

    pub fn i64_arg(&self, key: &str) -> Result<i64, RemoteError> {
        self.opt_i64(key)
            .ok_or_else(|| RemoteError::Invalid(format!("'{key}' must be an integer")))
    }

    pub fn bool_arg(&self, key: &str, default: bool) -> bool {
        self.payload
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    pub fn value(&self, key: &str) -> Value {
        self.payload.get(key).cloned().unwrap_or(Value::Null)
    }
}

/// One way of carrying out a logical operation.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> Result<Value, RemoteError>;
}

pub type ParamsFn = fn(&StrategyContext<'_>) -> Result<Value, RemoteError>;
pub type ExtractFn = fn(Value) -> Result<Value, RemoteError>;

/// A strategy that is a single remote method call.
pub struct MethodCall {
    name: &'static str,
    method: &'static str,
    params: ParamsFn,
    extract: ExtractFn,
}

impl MethodCall {
    pub fn new(name: &'static str, method: &'static str, params: ParamsFn) -> Self {
        Self {
            name,
            method,
            params,
            extract: Ok,
        }
    }

    /// Post-process the raw response; returning `Malformed` moves on to the
    /// next strategy.
    pub fn extract(mut self, extract: ExtractFn) -> Self {
        self.extract = extract;
        self
    }
}

#[async_trait]
impl Strategy for MethodCall {
    fn name(&self) -> &str {
        self.name
    }

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> Result<Value, RemoteError> {
        let params = (self.params)(ctx)?;
        let raw = ctx.conn.invoke(self.method, params).await?;
        (self.extract)(raw)
    }
}

/// Ordered, non-empty list of strategies for one logical operation.
#[derive(Clone)]
pub struct StrategyChain {
    operation: &'static str,
    class: OperationClass,
    strategies: Vec<Arc<dyn Strategy>>,
}

impl fmt::Debug for StrategyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyChain")
            .field("operation", &self.operation)
            .field("class", &self.class)
            .field("strategies", &self.strategy_names())
            .finish()
    }
}

impl StrategyChain {
    pub fn new(
        operation: &'static str,
        class: OperationClass,
        first: impl Strategy + 'static,
    ) -> Self {
        Self {
            operation,
            class,
            strategies: vec![Arc::new(first)],
        }
    }

    pub fn then(mut self, next: impl Strategy + 'static) -> Self {
        self.strategies.push(Arc::new(next));
        self
    }

    /// Append `times` more attempts of the last strategy.
    pub fn retry(mut self, times: usize) -> Self {
        if let Some(last) = self.strategies.last().cloned() {
            for _ in 0..times {
                self.strategies.push(Arc::clone(&last));
            }
        }
        self
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn class(&self) -> OperationClass {
        self.class
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try each strategy in order until one succeeds.
    ///
    /// `Unsupported` and `TransientError` move on to the next strategy; any
    /// other failure is returned as-is. A remote flood wait is recorded for
    /// the chain's class; in batch mode the same strategy is re-attempted once
    /// after the wait if it fits within the cap.
    pub async fn execute(
        &self,
        ctx: &StrategyContext<'_>,
        backoff: &BackoffController,
        mode: CallMode,
    ) -> ExecutionOutcome {
        let mut attempts: Vec<(&str, Failure)> = Vec::with_capacity(self.strategies.len());

        for (idx, strategy) in self.strategies.iter().enumerate() {
            let mut flood_retried = false;
            loop {
                backoff.admit(self.class, mode).await?;

                tracing::debug!(
                    operation = self.operation,
                    strategy = strategy.name(),
                    class = %self.class,
                    "attempt {}/{}",
                    idx + 1,
                    self.strategies.len()
                );

                let err = match strategy.attempt(ctx).await {
                    Ok(value) => {
                        if idx > 0 {
                            tracing::info!(
                                operation = self.operation,
                                strategy = strategy.name(),
                                "succeeded via fallback"
                            );
                        }
                        return Ok(value);
                    }
                    Err(err) => err,
                };

                let failure = classify(&err);
                tracing::debug!(
                    operation = self.operation,
                    strategy = strategy.name(),
                    kind = %failure.kind,
                    "attempt failed: {}",
                    failure.detail
                );

                if failure.kind == ErrorKind::RateLimited {
                    backoff.record_failure(self.class, &failure);
                    let fits = match (mode, failure.retry_after) {
                        (CallMode::Batch { max_wait }, Some(wait)) => wait <= max_wait,
                        _ => false,
                    };
                    if fits && !flood_retried {
                        flood_retried = true;
                        continue;
                    }
                    return Err(failure);
                }

                if !failure.kind.continues_chain() {
                    return Err(failure);
                }

                attempts.push((strategy.name(), failure));
                break;
            }
        }

        Err(self.exhausted(attempts))
    }

    fn exhausted(&self, attempts: Vec<(&str, Failure)>) -> Failure {
        let detail = attempts
            .iter()
            .map(|(name, f)| format!("{name}: {} ({})", f.kind, f.detail))
            .collect::<Vec<_>>()
            .join("; ");

        let message = best_message(attempts.iter().map(|(_, f)| f));

        tracing::warn!(
            operation = self.operation,
            class = %self.class,
            kind = %ErrorKind::AllStrategiesFailed,
            "all strategies failed: {detail}"
        );

        Failure::new(ErrorKind::AllStrategiesFailed, message).with_detail(detail)
    }
}

/// Most specific message seen: the last non-generic one, else the default
/// text of the kind every attempt shared, else the aggregate default.
fn best_message<'f>(failures: impl DoubleEndedIterator<Item = &'f Failure> + Clone) -> String {
    if let Some(f) = failures.clone().rev().find(|f| !f.is_generic()) {
        return f.message.clone();
    }
    let mut kinds = failures.map(|f| f.kind);
    if let Some(first) = kinds.next() {
        if kinds.all(|k| k == first) {
            return first.default_message().to_string();
        }
    }
    ErrorKind::AllStrategiesFailed.default_message().to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::domain::{EntityId, EntityKind};
    use crate::gateway::testing::FakeConnection;
    use crate::ports::RpcError;

    fn call(name: &'static str, method: &'static str) -> MethodCall {
        MethodCall::new(name, method, |ctx| Ok(json!({ "peer": ctx.target(0)?.peer() })))
    }

    fn chat() -> Vec<EntityHandle> {
        vec![EntityHandle::new(EntityId(5), EntityKind::Group, None)]
    }

    fn rpc(code: i32, name: &str) -> RemoteError {
        RemoteError::Rpc(RpcError::from_remote(code, name))
    }

    #[tokio::test]
    async fn unsupported_then_success_returns_success() {
        let conn = FakeConnection::new()
            .respond("a.primary", Err(rpc(400, "METHOD_INVALID")))
            .respond("a.secondary", Ok(json!({ "ok": 1 })));
        let chain = StrategyChain::new("op", OperationClass::Chats, call("primary", "a.primary"))
            .then(call("secondary", "a.secondary"));
        let targets = chat();
        let payload = Value::Null;
        let ctx = StrategyContext::new(&conn, &targets, &payload);

        let out = chain
            .execute(&ctx, &BackoffController::new(), CallMode::Interactive)
            .await
            .unwrap();

        assert_eq!(out, json!({ "ok": 1 }));
        assert_eq!(conn.calls_to("a.primary"), 1);
        assert_eq!(conn.calls_to("a.secondary"), 1);
    }

    #[tokio::test]
    async fn permission_denied_stops_the_chain() {
        let conn = FakeConnection::new()
            .respond("a.primary", Err(rpc(403, "CHAT_ADMIN_REQUIRED")))
            .respond("a.secondary", Ok(json!(true)))
            .respond("a.third", Ok(json!(true)));
        let chain = StrategyChain::new("op", OperationClass::Groups, call("primary", "a.primary"))
            .then(call("secondary", "a.secondary"))
            .then(call("third", "a.third"));
        let targets = chat();
        let payload = Value::Null;
        let ctx = StrategyContext::new(&conn, &targets, &payload);

        let f = chain
            .execute(&ctx, &BackoffController::new(), CallMode::Interactive)
            .await
            .unwrap_err();

        assert_eq!(f.kind, ErrorKind::PermissionDenied);
        assert_eq!(conn.calls_to("a.secondary"), 0);
        assert_eq!(conn.calls_to("a.third"), 0);
    }

    #[tokio::test]
    async fn exhaustion_prefers_specific_message() {
        let conn = FakeConnection::new()
            .respond("a.primary", Err(rpc(400, "BOT_METHOD_INVALID")))
            .respond("a.secondary", Err(RemoteError::Timeout));
        let chain = StrategyChain::new("op", OperationClass::Chats, call("primary", "a.primary"))
            .then(call("secondary", "a.secondary"));
        let targets = chat();
        let payload = Value::Null;
        let ctx = StrategyContext::new(&conn, &targets, &payload);

        let f = chain
            .execute(&ctx, &BackoffController::new(), CallMode::Interactive)
            .await
            .unwrap_err();

        assert_eq!(f.kind, ErrorKind::AllStrategiesFailed);
        assert!(!f.retryable);
        // Timeout has its own text; it was seen last so it wins.
        assert_eq!(f.message, "Telegram took too long to answer. Try again.");
        assert!(f.detail.contains("primary"));
        assert!(f.detail.contains("secondary"));
    }

    #[tokio::test]
    async fn exhaustion_with_generic_messages_uses_shared_kind() {
        let conn = FakeConnection::new()
            .respond("a.primary", Err(RemoteError::Unavailable("x".into())))
            .respond("a.secondary", Err(RemoteError::Malformed("y".into())));
        let chain = StrategyChain::new("op", OperationClass::Media, call("primary", "a.primary"))
            .then(call("secondary", "a.secondary"));
        let targets = chat();
        let payload = Value::Null;
        let ctx = StrategyContext::new(&conn, &targets, &payload);

        let f = chain
            .execute(&ctx, &BackoffController::new(), CallMode::Interactive)
            .await
            .unwrap_err();
        assert_eq!(f.message, ErrorKind::Unsupported.default_message());
    }

    #[tokio::test]
    async fn retry_repeats_the_last_strategy() {
        let conn = FakeConnection::new()
            .respond("messages.sendMessage", Err(RemoteError::Connection("reset".into())))
            .respond("messages.sendMessage", Ok(json!({ "id": 10 })));
        let chain =
            StrategyChain::new("send", OperationClass::Messaging, call("send", "messages.sendMessage"))
                .retry(1);
        assert_eq!(chain.len(), 2);
        let targets = chat();
        let payload = Value::Null;
        let ctx = StrategyContext::new(&conn, &targets, &payload);

        let out = chain
            .execute(&ctx, &BackoffController::new(), CallMode::Interactive)
            .await
            .unwrap();
        assert_eq!(out["id"], 10);
        assert_eq!(conn.calls_to("messages.sendMessage"), 2);
    }

    #[tokio::test]
    async fn interactive_flood_wait_records_block_and_fails() {
        let conn = FakeConnection::new()
            .respond("a.primary", Err(rpc(420, "FLOOD_WAIT_15")))
            .respond("a.secondary", Ok(json!(true)));
        let chain = StrategyChain::new("op", OperationClass::Messaging, call("primary", "a.primary"))
            .then(call("secondary", "a.secondary"));
        let targets = chat();
        let payload = Value::Null;
        let ctx = StrategyContext::new(&conn, &targets, &payload);
        let backoff = BackoffController::new();

        let f = chain
            .execute(&ctx, &backoff, CallMode::Interactive)
            .await
            .unwrap_err();
        assert_eq!(f.kind, ErrorKind::RateLimited);
        assert_eq!(f.retry_after, Some(Duration::from_secs(15)));
        assert_eq!(conn.calls_to("a.secondary"), 0);

        // The next interactive call in the class is rejected locally.
        let f = chain
            .execute(&ctx, &backoff, CallMode::Interactive)
            .await
            .unwrap_err();
        assert_eq!(f.kind, ErrorKind::RateLimited);
        assert_eq!(conn.calls_to("a.primary"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_flood_wait_sleeps_and_retries_once() {
        let conn = FakeConnection::new()
            .respond("a.primary", Err(rpc(420, "FLOOD_WAIT_3")))
            .respond("a.primary", Ok(json!("done")));
        let chain = StrategyChain::new("op", OperationClass::Messaging, call("primary", "a.primary"));
        let targets = chat();
        let payload = Value::Null;
        let ctx = StrategyContext::new(&conn, &targets, &payload);
        let start = tokio::time::Instant::now();

        let out = chain
            .execute(
                &ctx,
                &BackoffController::new(),
                CallMode::Batch {
                    max_wait: Duration::from_secs(10),
                },
            )
            .await
            .unwrap();

        assert_eq!(out, json!("done"));
        assert_eq!(conn.calls_to("a.primary"), 2);
        assert!(tokio::time::Instant::now() >= start + Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_flood_wait_beyond_cap_fails_without_sleeping() {
        let conn = FakeConnection::new().respond("a.primary", Err(rpc(420, "FLOOD_WAIT_300")));
        let chain = StrategyChain::new("op", OperationClass::Messaging, call("primary", "a.primary"));
        let targets = chat();
        let payload = Value::Null;
        let ctx = StrategyContext::new(&conn, &targets, &payload);
        let start = tokio::time::Instant::now();

        let f = chain
            .execute(
                &ctx,
                &BackoffController::new(),
                CallMode::Batch {
                    max_wait: Duration::from_secs(10),
                },
            )
            .await
            .unwrap_err();

        assert_eq!(f.kind, ErrorKind::RateLimited);
        assert_eq!(tokio::time::Instant::now(), start);
    }

    #[tokio::test]
    async fn local_validation_failure_stops_before_remote_call() {
        let conn = FakeConnection::new();
        let chain = StrategyChain::new(
            "op",
            OperationClass::Messaging,
            MethodCall::new("send", "messages.sendMessage", |ctx| {
                Ok(json!({ "message": ctx.str_arg("message")? }))
            }),
        );
        let targets = chat();
        let payload = json!({});
        let ctx = StrategyContext::new(&conn, &targets, &payload);

        let f = chain
            .execute(&ctx, &BackoffController::new(), CallMode::Interactive)
            .await
            .unwrap_err();
        assert_eq!(f.kind, ErrorKind::InvalidArgument);
        assert_eq!(conn.total_calls(), 0);
    }
}
