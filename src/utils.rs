//! Small platform helpers.

pub mod space;
