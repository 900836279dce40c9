//! Command handlers

pub mod book;
pub mod config;
pub mod scan;
pub mod tree;
pub mod vault;
