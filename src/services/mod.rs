pub mod change_notifier;
pub mod poller;
pub mod trade_executor;

pub use change_notifier::{EventSource, MongoChangeFeed};
pub use poller::Poller;
pub use trade_executor::{start_trade_executor, HandlerOutcome, OrderDecisionHandler, OrderDeduplicator};
