//! Client for the remote conversational service.

mod client;

#[cfg(test)]
pub(crate) use client::testing;
pub use client::{ChatResponse, ChatUploadClient, UploadError};
