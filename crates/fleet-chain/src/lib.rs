//! Endpoint primitives and transport seam for the module fleet manager
//!
//! This is the bottom layer of the workspace. It owns everything that talks
//! about a live endpoint without knowing what a module configuration is:
//!
//! - **Primitives**: [`Address`], [`H256`], [`EndpointId`], [`ChainMetadata`]
//! - **Transport**: the [`Transport`] trait and its [`Call`] / [`Receipt`] / [`Event`] types
//! - **Retry**: bounded exponential backoff for reads ([`retry`])
//! - **Events**: windowed, concurrent log scanning ([`events`])
//! - **Messages**: wire parsing and message ids ([`message`])
//! - **Factories**: the write-once [`FactoryCache`]
//!
//! ```text
//!        fleet-core
//!            |
//!        fleet-meta
//!            |
//!        fleet-chain
//! ```

pub mod abi;
pub mod error;
pub mod events;
pub mod factory;
pub mod message;
pub mod retry;
pub mod transport;
pub mod types;

pub use error::{Error, Result, TransportError};
pub use events::{BlockRanges, find_dispatch, query_events_paginated};
pub use factory::{FactoryBindings, FactoryCache, FactoryKey};
pub use message::{ParsedMessage, message_id, parse_message};
pub use retry::{RetryPolicy, read_with_retry, with_retry};
pub use transport::{Call, Event, EventFilter, Receipt, Transport};
pub use types::{Address, ChainMetadata, DomainId, EndpointId, H256, ProtocolKind};
