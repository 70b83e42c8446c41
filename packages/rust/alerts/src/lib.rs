//! Change alerts: deciding, rendering and exactly-once delivery.
//!
//! - [`decide`] / [`render`] - pure functions over two classifications
//! - [`NotificationTransport`] - the delivery seam ([`LogTransport`],
//!   [`WebhookTransport`])
//! - [`AlertDispatcher`] - ledger-backed delivery, at most one message per
//!   company and fingerprint

pub mod decide;
pub mod dispatch;
pub mod transport;

pub use decide::{RenderedMessage, decide, render};
pub use dispatch::{AlertDispatcher, Delivery};
pub use transport::{LogTransport, NotificationTransport, WebhookTransport, transport_from_config};
