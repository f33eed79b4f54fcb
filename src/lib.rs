pub mod body;
pub mod chunked;
pub mod config;
pub mod exception;
pub mod handler;
pub mod headers;
pub mod idle;
pub mod multipart;
pub mod param;
pub mod post;
pub mod query;
pub mod registry;
pub mod request;
pub mod response;
pub mod server;
pub mod session;
pub mod util;

pub use body::BodyKind;
pub use chunked::ChunkedEncoder;
pub use config::{Config, Settings};
pub use exception::{Exception, FormatError};
pub use handler::{Decision, Flow, Handler};
pub use headers::HeaderMap;
pub use post::Post;
pub use registry::HandlerRegistry;
pub use request::Request;
pub use response::Response;
pub use server::Server;
pub use session::Session;
pub use util::HtmlBuilder;
