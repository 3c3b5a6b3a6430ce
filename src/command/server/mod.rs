mod api;
mod command;
mod http_server;
mod listener;
mod request_ext;
mod router;
mod server_context;

pub use command::{Command, Options};
pub use server_context::ServerContext;
