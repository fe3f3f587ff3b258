//! Utility functions for the application

pub mod crypto;
pub mod retry;
pub mod string;
pub mod time;
