pub mod client;
pub mod format;
pub mod imap;
pub mod model;
pub mod pagination;
pub mod provider;
pub mod search;
pub mod smtp;
pub mod structure;
