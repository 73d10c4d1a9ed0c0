/*!
# rpireport DevKit - test doubles for the reporter agent

- `MockTransport`: broker-free `Transport` recording every publish
- `StaticMetrics`: canned `MetricsProvider` with optional delay
- `TestHarness`: agent wiring plus assertions over published messages
*/

pub mod mock_transport;
pub mod static_metrics;
pub mod test_utils;

pub use mock_transport::{ConnectOutcome, MockMessage, MockTransport};
pub use static_metrics::{sample_identity, sample_snapshot, StaticMetrics};
pub use test_utils::{settle, TestHarness};
