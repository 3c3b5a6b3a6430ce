mod forwarder;
mod interceptor;
pub mod matcher;
mod response_body;

pub use forwarder::Forwarder;
pub use interceptor::Interceptor;
pub use matcher::{match_pull_manifest, ImageInfo};
pub use response_body::{copy_response, error_response, json_response, ResponseBody};
