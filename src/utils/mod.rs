pub mod create_clob_client;
pub mod data_api;
pub mod fetch_data;
pub mod logger;
pub mod post_order;
pub mod transform;

pub use create_clob_client::create_clob_client;
pub use data_api::{DataApiClient, MarketData};
pub use fetch_data::{fetch_data, MarketDataError, RetryPolicy};
pub use logger::Logger;
pub use post_order::{ClobOrderSubmitter, OrderAck, OrderSubmitter, PreviewSubmitter, SubmitError};
pub use transform::{transform_activity, transform_position, unique_activity_key, TransformError};
