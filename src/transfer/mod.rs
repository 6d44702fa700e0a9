//! Transfer primitives shared by every remote client: the stop handle,
//! resumable single-file copies and the bounded worker pool used inside a
//! directory fetch.

pub mod control;
pub mod copy;
pub mod pool;
pub mod resume;
