//! Per-endpoint check state shared by a run's concurrent tasks

use std::collections::BTreeMap;
use std::sync::Mutex;

use fleet_chain::EndpointId;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where an endpoint is in its check run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointStatus {
    Pending,
    Running,
    Completed,
    Skipped(String),
}

impl EndpointStatus {
    fn can_become(&self, next: &EndpointStatus) -> bool {
        use EndpointStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Skipped(_))
                | (Running, Completed)
                | (Running, Skipped(_))
        )
    }
}

/// Current status and transition history of every endpoint in a run
#[derive(Debug, Default)]
pub struct StatusBoard {
    inner: Mutex<BTreeMap<EndpointId, Vec<EndpointStatus>>>,
}

impl StatusBoard {
    /// A board with every endpoint `Pending`
    pub fn new<'a>(endpoints: impl IntoIterator<Item = &'a EndpointId>) -> Self {
        let history = endpoints
            .into_iter()
            .map(|id| (id.clone(), vec![EndpointStatus::Pending]))
            .collect();
        Self {
            inner: Mutex::new(history),
        }
    }

    /// Move `endpoint` to `next`, rejecting transitions the state machine forbids
    pub fn advance(&self, endpoint: &EndpointId, next: EndpointStatus) -> Result<()> {
        let mut board = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let history = board
            .get_mut(endpoint)
            .ok_or_else(|| Error::invariant(format!("{endpoint} is not part of this check run")))?;
        let current = history.last().unwrap_or(&EndpointStatus::Pending);
        if !current.can_become(&next) {
            return Err(Error::invariant(format!(
                "{endpoint} cannot move from {current:?} to {next:?}"
            )));
        }
        tracing::debug!(endpoint = %endpoint, status = ?next, "Endpoint status");
        history.push(next);
        Ok(())
    }

    pub fn current(&self, endpoint: &EndpointId) -> Option<EndpointStatus> {
        let board = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        board.get(endpoint).and_then(|h| h.last().cloned())
    }

    /// Final statuses and full histories
    pub fn into_parts(
        self,
    ) -> (
        BTreeMap<EndpointId, EndpointStatus>,
        BTreeMap<EndpointId, Vec<EndpointStatus>>,
    ) {
        let history = self.inner.into_inner().unwrap_or_else(|p| p.into_inner());
        let current = history
            .iter()
            .map(|(id, h)| (id.clone(), h.last().cloned().unwrap_or(EndpointStatus::Pending)))
            .collect();
        (current, history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_endpoints_complete() {
        let alpha = EndpointId::new("alpha");
        let board = StatusBoard::new([&alpha]);
        board.advance(&alpha, EndpointStatus::Running).unwrap();
        assert_eq!(board.current(&alpha), Some(EndpointStatus::Running));
        board.advance(&alpha, EndpointStatus::Completed).unwrap();

        let (current, history) = board.into_parts();
        assert_eq!(current[&alpha], EndpointStatus::Completed);
        assert_eq!(
            history[&alpha],
            vec![EndpointStatus::Pending, EndpointStatus::Running, EndpointStatus::Completed]
        );
    }

    #[test]
    fn finished_endpoints_cannot_restart() {
        let alpha = EndpointId::new("alpha");
        let board = StatusBoard::new([&alpha]);
        board.advance(&alpha, EndpointStatus::Skipped("gone".into())).unwrap();

        let err = board.advance(&alpha, EndpointStatus::Running).unwrap_err();
        assert!(err.is_fatal());
        assert!(board.advance(&EndpointId::new("beta"), EndpointStatus::Running).is_err());
    }
}
