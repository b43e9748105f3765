//! The Operation Gateway: identifier resolution, fallback execution,
//! pagination, failure classification and flood-control backoff behind one
//! facade that every tool handler calls.

pub mod backoff;
pub mod catalog;
pub mod classify;
pub mod fallback;
pub mod paginate;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use crate::{
    config::GatewayConfig,
    domain::{EntityHandle, EntityId, OperationClass, OperationRequest},
    ports::{Listing, RemoteConnection},
};

pub use backoff::{BackoffController, CallMode, Gate};
pub use catalog::{Catalog, Op, PRIVACY_KEYS};
pub use classify::{classify, error_code, ErrorKind, ExecutionOutcome, Failure};
pub use fallback::{MethodCall, Strategy, StrategyChain, StrategyContext};
pub use paginate::{ListingSource, Page, PageSource, Paginator};
pub use resolver::{Identifier, Resolver};

pub struct Gateway {
    conn: Arc<dyn RemoteConnection>,
    resolver: Resolver,
    backoff: BackoffController,
    paginator: Paginator,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(conn: Arc<dyn RemoteConnection>, config: GatewayConfig) -> Self {
        Self {
            conn,
            resolver: Resolver::new(config.resolver_ttl, config.resolver_capacity),
            backoff: BackoffController::new(),
            paginator: Paginator::new(config.page_max_items),
            config,
        }
    }

    /// Fail fast when rate limited.
    pub fn interactive(&self) -> CallMode {
        CallMode::Interactive
    }

    /// Sleep through short blocks, up to the configured cap.
    pub fn batch(&self) -> CallMode {
        CallMode::Batch {
            max_wait: self.config.backoff_max_wait,
        }
    }

    pub fn backoff(&self) -> &BackoffController {
        &self.backoff
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub async fn resolve(&self, raw: &str, mode: CallMode) -> ExecutionOutcome<EntityHandle> {
        self.resolver
            .resolve(self.conn.as_ref(), &self.backoff, mode, raw)
            .await
    }

    /// Resolve every raw identifier in order; the first failure wins.
    pub async fn resolve_all(
        &self,
        raws: &[String],
        mode: CallMode,
    ) -> ExecutionOutcome<Vec<EntityHandle>> {
        let mut handles = Vec::with_capacity(raws.len());
        for raw in raws {
            handles.push(self.resolve(raw, mode).await?);
        }
        Ok(handles)
    }

    pub fn invalidate_entity(&self, id: EntityId) {
        self.resolver.invalidate_entity(id);
    }

    /// Resolve the request's targets and run the chain registered for `op`.
    pub async fn execute(
        &self,
        request: &OperationRequest,
        op: Op,
        mode: CallMode,
    ) -> ExecutionOutcome {
        match self.resolve_all(&request.targets, mode).await {
            Ok(targets) => self.execute_on(request, op, &targets, mode).await,
            Err(failure) => {
                let outcome = Err(failure);
                self.log_failure(request.operation, op.class(), &outcome);
                outcome
            }
        }
    }

    /// Run the chain registered for `op` against targets the caller already
    /// resolved. `request.targets` is only used for logging here.
    pub async fn execute_on(
        &self,
        request: &OperationRequest,
        op: Op,
        targets: &[EntityHandle],
        mode: CallMode,
    ) -> ExecutionOutcome {
        let chain = Catalog::global().chain(op);
        let outcome = self.run_chain(request, chain, targets, mode).await;
        if outcome.is_ok() && matches!(op, Op::LeaveChat | Op::DeleteContact) {
            if let Some(target) = targets.first() {
                self.resolver.invalidate_entity(target.id());
            }
        }
        self.log_failure(request.operation, chain.class(), &outcome);
        outcome
    }

    /// Run an arbitrary chain against already-resolved targets.
    pub async fn run_chain(
        &self,
        request: &OperationRequest,
        chain: &StrategyChain,
        targets: &[EntityHandle],
        mode: CallMode,
    ) -> ExecutionOutcome {
        let ctx = StrategyContext::new(self.conn.as_ref(), targets, &request.payload);
        chain.execute(&ctx, &self.backoff, mode).await
    }

    /// Return one page of a listing.
    ///
    /// Page arguments are validated before anything is resolved or fetched.
    pub async fn list<F>(
        &self,
        request: &OperationRequest,
        class: OperationClass,
        index: i64,
        size: i64,
        mode: CallMode,
        listing: F,
    ) -> ExecutionOutcome<Page>
    where
        F: FnOnce(&[EntityHandle]) -> Result<Listing, Failure> + Send,
    {
        let outcome = self
            .list_inner(request, class, index, size, mode, listing)
            .await;
        self.log_failure(request.operation, class, &outcome);
        outcome
    }

    async fn list_inner<F>(
        &self,
        request: &OperationRequest,
        class: OperationClass,
        index: i64,
        size: i64,
        mode: CallMode,
        listing: F,
    ) -> ExecutionOutcome<Page>
    where
        F: FnOnce(&[EntityHandle]) -> Result<Listing, Failure> + Send,
    {
        let (index, size) = Paginator::validate(index, size)?;
        let targets = self.resolve_all(&request.targets, mode).await?;
        let listing = listing(&targets)?;

        self.backoff.admit(class, mode).await?;
        let source = ListingSource {
            conn: self.conn.as_ref(),
            listing: &listing,
        };
        let page = self.paginator.page(&source, index, size).await;
        if let Err(failure) = &page {
            self.backoff.record_failure(class, failure);
        }
        page
    }

    fn log_failure<T>(&self, operation: &str, class: OperationClass, outcome: &ExecutionOutcome<T>) {
        if let Err(f) = outcome {
            tracing::warn!(
                operation,
                class = %class,
                kind = %f.kind,
                retryable = f.retryable,
                "operation failed: {} | {}",
                f.message,
                f.detail
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::domain::EntityKind;
    use crate::ports::{RemoteError, Window};
    use testing::FakeConnection;

    fn gateway(conn: FakeConnection) -> (Arc<FakeConnection>, Gateway) {
        let conn = Arc::new(conn);
        let gw = Gateway::new(conn.clone(), GatewayConfig::default());
        (conn, gw)
    }

    #[tokio::test]
    async fn send_to_username_resolves_once_and_retries_transient_failure() {
        let (conn, gw) = gateway(
            FakeConnection::new()
                .with_entity("newsbot", 4242, EntityKind::User, "News Bot")
                .respond("messages.sendMessage", Err(RemoteError::Timeout))
                .respond("messages.sendMessage", Ok(json!({ "id": 99 }))),
        );
        let request = OperationRequest::new("send_message")
            .target("@newsbot")
            .payload(json!({ "message": "hello" }));

        let out = gw
            .execute(&request, Op::SendMessage, gw.interactive())
            .await
            .unwrap();

        assert_eq!(out["id"], 99);
        assert_eq!(conn.lookups(), 1);
        assert_eq!(conn.calls_to("messages.sendMessage"), 2);
    }

    #[tokio::test]
    async fn unresolvable_target_makes_no_invocation() {
        let (conn, gw) = gateway(FakeConnection::new());
        let request = OperationRequest::new("send_message")
            .target("@nobody_here")
            .payload(json!({ "message": "hello" }));

        let f = gw
            .execute(&request, Op::SendMessage, gw.interactive())
            .await
            .unwrap_err();
        assert_eq!(f.kind, ErrorKind::NotFound);
        assert_eq!(conn.calls_to("messages.sendMessage"), 0);
    }

    #[tokio::test]
    async fn bad_page_arguments_make_no_remote_calls() {
        let (conn, gw) = gateway(FakeConnection::new().with_listing(vec![json!(1)], false));
        let request = OperationRequest::new("get_messages").target("@team_chat");

        for (index, size) in [(0, 20), (1, 0)] {
            let f = gw
                .list(&request, OperationClass::Chats, index, size, gw.interactive(), |t| {
                    Ok(Listing::Messages { chat: t[0].clone() })
                })
                .await
                .unwrap_err();
            assert_eq!(f.kind, ErrorKind::InvalidArgument);
        }
        assert_eq!(conn.lookups(), 0);
        assert_eq!(conn.total_calls(), 0);
    }

    #[tokio::test]
    async fn list_resolves_then_pages() {
        let items: Vec<_> = (1..=45).map(|i| json!({ "id": i })).collect();
        let (conn, gw) = gateway(
            FakeConnection::new()
                .with_entity("team_chat", 7, EntityKind::Group, "Team")
                .with_listing(items, true),
        );
        let request = OperationRequest::new("get_messages").target("@team_chat");

        let page = gw
            .list(&request, OperationClass::Chats, 3, 20, gw.interactive(), |t| {
                Ok(Listing::Messages { chat: t[0].clone() })
            })
            .await
            .unwrap();

        assert_eq!(page.items.len(), 5);
        assert!(!page.has_more);
        assert_eq!(conn.fetches(), vec![Window { offset: 40, limit: 21 }]);
    }

    #[tokio::test]
    async fn gated_class_rejects_interactive_calls_locally() {
        let (conn, gw) = gateway(
            FakeConnection::new().with_entity("42", 42, EntityKind::User, "Al"),
        );
        gw.backoff().record_block(
            OperationClass::Messaging,
            tokio::time::Instant::now() + Duration::from_secs(20),
            "FLOOD_WAIT",
        );
        let request = OperationRequest::new("send_message")
            .target("42")
            .payload(json!({ "message": "hi" }));

        let f = gw
            .execute(&request, Op::SendMessage, gw.interactive())
            .await
            .unwrap_err();
        assert_eq!(f.kind, ErrorKind::RateLimited);
        assert_eq!(conn.calls_to("messages.sendMessage"), 0);
    }

    #[tokio::test]
    async fn execute_on_reuses_caller_resolved_targets() {
        let (conn, gw) = gateway(
            FakeConnection::new()
                .with_entity("team", -1005, EntityKind::Channel, "Team")
                .respond("channels.getFullChannel", Ok(json!({ "full_chat": { "about": "hi" } }))),
        );
        let request = OperationRequest::new("get_chat").target("@team");

        let handle = gw.resolve("@team", gw.interactive()).await.unwrap();
        let full = gw
            .execute_on(&request, Op::GetChat, std::slice::from_ref(&handle), gw.interactive())
            .await
            .unwrap();

        assert_eq!(full["about"], "hi");
        assert_eq!(conn.lookups(), 1);
        assert_eq!(conn.calls_to("channels.getFullChannel"), 1);
    }

    #[tokio::test]
    async fn leaving_a_chat_drops_its_cache_entries() {
        let (conn, gw) = gateway(
            FakeConnection::new()
                .with_entity("old_channel", -1001, EntityKind::Channel, "Old")
                .respond("channels.leaveChannel", Ok(json!(true))),
        );
        let request = OperationRequest::new("leave_chat").target("@old_channel");

        gw.execute(&request, Op::LeaveChat, gw.interactive())
            .await
            .unwrap();
        assert!(gw.resolver().is_empty());
        assert_eq!(conn.lookups(), 1);
    }
}
