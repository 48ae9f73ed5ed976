#![forbid(unsafe_code)]

//! `plektron-net`
//!
//! Transport collaborator for the range loader: a single `open(request)`
//! operation returning status, final URL, headers and a body byte stream.
//! Every status is surfaced to the caller; protocol validation happens in the
//! loader, not here.

mod client;
mod error;
mod timeout;
mod traits;
mod types;

pub use crate::{
    client::HttpClient,
    error::{NetError, NetResult},
    timeout::TimeoutNet,
    traits::{ByteStream, Net, NetExt, Response},
    types::{CorsMode, Headers, NetOptions, RangeSpec, Request},
};
