//! HTTP server for healthdesk

mod http;

#[cfg(test)]
mod tests;

pub use http::{dispatch, run, AppState, REQUEST_ID_HEADER};
