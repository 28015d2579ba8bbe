pub mod credential;
pub mod jsonrpc;
pub mod proxy;
pub mod session;

pub use credential::Credential;
pub use jsonrpc::{JsonRpcRequest, JsonRpcResponse};
pub use proxy::{ProxyEndpoint, ProxyResponse, RequestContext, Upstream, UpstreamError};
pub use session::{Session, SessionManager};
