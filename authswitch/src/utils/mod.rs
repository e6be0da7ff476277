//! Small shared helpers.

pub mod fs;
pub mod time;
