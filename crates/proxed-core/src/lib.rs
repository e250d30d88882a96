pub mod auth;
pub mod memory;
pub mod pipeline;
pub mod quota;
pub mod record;
pub mod stores;

pub use auth::{AuthInputs, AuthenticatedCall, authenticate};
pub use memory::{
    MemoryExecutionSink, MemoryProjectStore, MemoryTeamMetrics, StaticDeviceVerifier,
};
pub use pipeline::{CallPayload, Pipeline, ProxyCallRequest, RelayResponse};
pub use quota::enforce_quota;
pub use record::{ExecutionRecord, MAX_CAPTURE_CHARS, truncate_chars};
pub use stores::{
    DeviceVerifier, ExecutionSink, Project, ProjectStore, ProjectWithProvider, ProviderKeyRecord,
    StoreError, TeamLimits, TeamMetricsStore,
};
