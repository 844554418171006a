//! Event scanning over bounded block windows
//!
//! Endpoints that cap the span of a single log query are scanned in windows.
//! [`BlockRanges`] yields the windows lazily; [`query_events_paginated`]
//! fetches them concurrently and concatenates the results in block order.

use std::ops::RangeInclusive;

use futures::future::try_join_all;

use crate::abi;
use crate::error::{Error, Result};
use crate::message::{message_id, parse_message};
use crate::retry::{RetryPolicy, with_retry};
use crate::transport::{Event, EventFilter, Transport};
use crate::types::{Address, EndpointId, H256};

/// Inclusive block windows covering `from..=to`, each at most `window` wide
#[derive(Debug, Clone)]
pub struct BlockRanges {
    next: u64,
    to: u64,
    window: u64,
    done: bool,
}

impl BlockRanges {
    /// Split `from..=to` into windows of `window` blocks
    ///
    /// A `window` of `None` or `0` yields the whole range at once. An empty
    /// range (`from > to`) yields nothing.
    pub fn new(from: u64, to: u64, window: Option<u64>) -> Self {
        let window = match window {
            Some(w) if w > 0 => w,
            _ => u64::MAX,
        };
        Self {
            next: from,
            to,
            window,
            done: from > to,
        }
    }
}

impl Iterator for BlockRanges {
    type Item = RangeInclusive<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let start = self.next;
        let end = start.saturating_add(self.window - 1).min(self.to);
        if end >= self.to {
            self.done = true;
        } else {
            self.next = end + 1;
        }
        Some(start..=end)
    }
}

/// Fetch every matching event in `from..=to`, honoring the endpoint's window
pub async fn query_events_paginated(
    transport: &dyn Transport,
    endpoint: &EndpointId,
    filter: &EventFilter,
    from: u64,
    to: u64,
    max_window: Option<u64>,
    policy: &RetryPolicy,
) -> Result<Vec<Event>> {
    let windows: Vec<_> = BlockRanges::new(from, to, max_window).collect();
    tracing::debug!(
        endpoint = %endpoint,
        event = %filter.name,
        from,
        to,
        windows = windows.len(),
        "Scanning events"
    );

    let pages = try_join_all(windows.into_iter().map(|range| async move {
        let (start, end) = (*range.start(), *range.end());
        with_retry(endpoint, &filter.name, policy, || {
            transport.query_events(endpoint, filter, start, end)
        })
        .await
    }))
    .await?;

    let mut events: Vec<Event> = pages.into_iter().flatten().collect();
    // Pages are already in window order; within a page the transport decides
    events.sort_by_key(|e| (e.block_number, e.log_index));
    Ok(events)
}

/// Locate the dispatch event that carried `id`
///
/// Scans the mailbox's dispatch events from `from_block` to the current head.
/// Returns `None` when no event matches. Two or more matches mean the message
/// id is not unique, which can only be a bug upstream.
pub async fn find_dispatch(
    transport: &dyn Transport,
    endpoint: &EndpointId,
    mailbox: Address,
    id: H256,
    from_block: u64,
    max_window: Option<u64>,
    policy: &RetryPolicy,
) -> Result<Option<Event>> {
    let head =
        with_retry(endpoint, "blockNumber", policy, || transport.block_number(endpoint)).await?;
    let filter = EventFilter::new(Some(mailbox), abi::event::DISPATCH);
    let events =
        query_events_paginated(transport, endpoint, &filter, from_block, head, max_window, policy)
            .await?;

    let mut matches = Vec::new();
    for event in events {
        if parse_message(&event.data).is_err() {
            tracing::warn!(
                endpoint = %endpoint,
                block = event.block_number,
                "Skipping undecodable dispatch"
            );
            continue;
        }
        if message_id(&event.data) == id {
            matches.push(event);
        }
    }

    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.pop()),
        n => Err(Error::InvariantViolation(format!(
            "message {} dispatched {} times on {}",
            id, n, endpoint
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(0, 9, Some(5), vec![0..=4, 5..=9])]
    #[case(0, 10, Some(5), vec![0..=4, 5..=9, 10..=10])]
    #[case(3, 3, Some(5), vec![3..=3])]
    #[case(0, 100, None, vec![0..=100])]
    #[case(0, 100, Some(0), vec![0..=100])]
    #[case(7, 6, Some(5), vec![])]
    fn ranges_cover_interval(
        #[case] from: u64,
        #[case] to: u64,
        #[case] window: Option<u64>,
        #[case] expected: Vec<RangeInclusive<u64>>,
    ) {
        let ranges: Vec<_> = BlockRanges::new(from, to, window).collect();
        assert_eq!(ranges, expected);
    }

    #[test]
    fn ranges_do_not_overflow_at_u64_max() {
        let ranges: Vec<_> = BlockRanges::new(u64::MAX - 1, u64::MAX, Some(10)).collect();
        assert_eq!(ranges, vec![u64::MAX - 1..=u64::MAX]);
    }
}
