//! `rill-net`
//!
//! HTTP access layer for rill.
//!
//! Exposes an object-safe [`Net`] trait so the downloader can be driven by any
//! HTTP implementation (a scripted one in tests, [`ReqwestNet`] in production).
//! Responses are fully buffered: the downloader consumes exactly one cache
//! block (or one livestream segment) per request, so streaming bodies would
//! buy nothing.
//!
//! Non-2xx statuses surface as [`NetError::HttpStatus`] carrying the status
//! code; the fetch layer maps specific codes (204/404/403) onto livestream
//! stream state.

#![forbid(unsafe_code)]

mod client;
mod error;
mod types;

pub use client::{HttpResponse, Net, ReqwestNet};
pub use error::{NetError, NetResult};
pub use types::{Headers, NetOptions, RangeSpec};
