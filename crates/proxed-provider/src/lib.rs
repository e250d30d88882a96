pub mod credential;
pub mod dispatch;
pub mod pricing;
pub mod transcode;
pub mod usage;

pub use credential::{UpstreamApiKey, assemble_key};
pub use dispatch::{
    Dispatcher, Headers, UpstreamBody, UpstreamCall, UpstreamResponse, WreqDispatcher,
    WreqDispatcherConfig, header_get,
};
pub use pricing::{Cost, calculate_cost};
pub use transcode::{StructuredKind, StructuredRequest, resolved_model, structured_to_native};
pub use usage::{UsageCollector, UsageMetrics};
