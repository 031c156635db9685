//! Live collaborator implementations

pub mod membership_http;

pub use membership_http::HttpMembershipClient;
