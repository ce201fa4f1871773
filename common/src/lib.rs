#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod activation;
pub mod error;
pub mod policy;
pub mod storage;
pub mod utils;
