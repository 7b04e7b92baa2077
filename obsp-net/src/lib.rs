// obsp-net/src/lib.rs
pub mod fetch;
pub mod http;

pub use fetch::ArtifactFetcher;
pub use http::{build_http_client, HttpTransport, TransferOutcome, Transport};
