use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::ports::{Listing, RemoteConnection, RemoteError, Window};

use super::classify::{classify, ErrorKind, ExecutionOutcome, Failure};

/// One page of a listing. `index` is 1-based.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Page<T = Value> {
    pub items: Vec<T>,
    pub index: usize,
    pub size: usize,
    pub has_more: bool,
}

/// Something that can hand out windows of an ordered result set.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Whether `fetch` honours `Window::offset`.
    fn supports_cursor(&self) -> bool;

    async fn fetch(&self, window: Window) -> Result<Vec<Value>, RemoteError>;
}

/// [`PageSource`] over one listing of a remote connection.
pub struct ListingSource<'a> {
    pub conn: &'a dyn RemoteConnection,
    pub listing: &'a Listing,
}

#[async_trait]
impl PageSource for ListingSource<'_> {
    fn supports_cursor(&self) -> bool {
        self.conn.supports_cursor(self.listing)
    }

    async fn fetch(&self, window: Window) -> Result<Vec<Value>, RemoteError> {
        self.conn.fetch_listing(self.listing, window).await
    }
}

/// Uniform page slicing over cursor-capable and materialize-only sources.
#[derive(Clone, Copy, Debug)]
pub struct Paginator {
    max_items: usize,
}

impl Paginator {
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items: max_items.max(1),
        }
    }

    /// Check caller-supplied page arguments before any remote call.
    pub fn validate(index: i64, size: i64) -> Result<(usize, usize), Failure> {
        if index < 1 {
            return Err(Failure::invalid("page must be 1 or greater."));
        }
        if size < 1 {
            return Err(Failure::invalid("page_size must be 1 or greater."));
        }
        let index = usize::try_from(index).map_err(|_| Failure::invalid("page is too large."))?;
        let size =
            usize::try_from(size).map_err(|_| Failure::invalid("page_size is too large."))?;
        if (index - 1).checked_mul(size).is_none() {
            return Err(Failure::invalid("page is too large."));
        }
        Ok((index, size))
    }

    /// Return page `index` of `size` items. Items arrive in source order, so
    /// concatenating pages 1..k yields the first k×size items.
    pub async fn page(
        &self,
        source: &dyn PageSource,
        index: usize,
        size: usize,
    ) -> ExecutionOutcome<Page> {
        if index < 1 || size < 1 {
            return Err(Failure::invalid("page and page_size must be 1 or greater."));
        }
        let offset = (index - 1)
            .checked_mul(size)
            .ok_or_else(|| Failure::invalid("page is too large."))?;

        if source.supports_cursor() {
            let mut items = source
                .fetch(Window {
                    offset,
                    limit: size.saturating_add(1),
                })
                .await
                .map_err(|e| classify(&e))?;
            let has_more = items.len() > size;
            items.truncate(size);
            return Ok(Page {
                items,
                index,
                size,
                has_more,
            });
        }

        let all = source
            .fetch(Window {
                offset: 0,
                limit: self.max_items + 1,
            })
            .await
            .map_err(|e| classify(&e))?;
        if all.len() > self.max_items {
            tracing::warn!(
                max_items = self.max_items,
                kind = %ErrorKind::ResultTooLarge,
                "listing exceeds safety cap"
            );
            return Err(Failure::new(
                ErrorKind::ResultTooLarge,
                format!(
                    "The result has more than {} items. Narrow the request.",
                    self.max_items
                ),
            ));
        }

        let has_more = all.len() > offset.saturating_add(size);
        let items = all.into_iter().skip(offset).take(size).collect();
        Ok(Page {
            items,
            index,
            size,
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::gateway::testing::FakeConnection;

    fn items(n: usize) -> Vec<Value> {
        (1..=n).map(|i| json!({ "id": i })).collect()
    }

    async fn pages_of(conn: &FakeConnection, size: usize, pages: usize) -> Vec<Page> {
        let listing = Listing::Dialogs;
        let source = ListingSource {
            conn,
            listing: &listing,
        };
        let p = Paginator::new(5000);
        let mut out = Vec::new();
        for index in 1..=pages {
            out.push(p.page(&source, index, size).await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn materialized_listing_splits_into_pages() {
        let conn = FakeConnection::new().with_listing(items(45), false);
        let pages = pages_of(&conn, 20, 3).await;

        assert_eq!(pages[0].items.len(), 20);
        assert!(pages[0].has_more);
        assert_eq!(pages[1].items.len(), 20);
        assert!(pages[1].has_more);
        assert_eq!(pages[2].items.len(), 5);
        assert!(!pages[2].has_more);
        assert_eq!(pages[2].items[0]["id"], 41);
    }

    #[tokio::test]
    async fn cursor_listing_fetches_one_extra_item() {
        let conn = FakeConnection::new().with_listing(items(45), true);
        let pages = pages_of(&conn, 20, 3).await;

        assert_eq!(pages[2].items.len(), 5);
        assert!(!pages[2].has_more);
        assert_eq!(
            conn.fetches(),
            vec![
                Window { offset: 0, limit: 21 },
                Window { offset: 20, limit: 21 },
                Window { offset: 40, limit: 21 },
            ]
        );
    }

    #[tokio::test]
    async fn concatenated_pages_are_a_prefix_of_the_listing() {
        let conn = FakeConnection::new().with_listing(items(45), false);
        let all: Vec<Value> = pages_of(&conn, 7, 4)
            .await
            .into_iter()
            .flat_map(|p| p.items)
            .collect();
        assert_eq!(all, items(28));
    }

    #[tokio::test]
    async fn past_the_end_is_empty() {
        let conn = FakeConnection::new().with_listing(items(10), false);
        let listing = Listing::Contacts;
        let source = ListingSource {
            conn: &conn,
            listing: &listing,
        };
        let page = Paginator::new(100).page(&source, 3, 10).await.unwrap();
        assert!(page.items.is_empty());
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn oversized_materialized_listing_is_rejected() {
        let conn = FakeConnection::new().with_listing(items(12), false);
        let listing = Listing::Contacts;
        let source = ListingSource {
            conn: &conn,
            listing: &listing,
        };
        let f = Paginator::new(10).page(&source, 1, 5).await.unwrap_err();
        assert_eq!(f.kind, ErrorKind::ResultTooLarge);
        assert_eq!(conn.fetches(), vec![Window { offset: 0, limit: 11 }]);
    }

    #[test]
    fn validate_rejects_non_positive_arguments() {
        for (i, s) in [(0, 20), (1, 0), (-3, 5), (2, -1)] {
            let f = Paginator::validate(i, s).unwrap_err();
            assert_eq!(f.kind, ErrorKind::InvalidArgument);
        }
        assert_eq!(Paginator::validate(2, 20).unwrap(), (2, 20));
    }
}
