//! HTTP request/response shapes exchanged between policies and the transport.

mod request;
mod response;

pub use request::{Body, ByteStream, Request, RequestHead, StreamBody};
pub use response::Response;

pub use bytes::Bytes;
pub use reqwest::header;
pub use reqwest::{Method, StatusCode};
pub use url::Url;
