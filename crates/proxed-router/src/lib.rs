pub mod proxy;

pub use proxy::{AppState, proxy_router};
