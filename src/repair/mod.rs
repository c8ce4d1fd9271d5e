pub mod batch;
pub mod extract;
pub mod harness;
pub mod sanitize;
pub mod session;
