mod allocator;
mod client;
mod shared;
mod status;
mod task;

pub use allocator::*;
pub use client::*;
pub use shared::*;
pub use status::*;
pub use task::*;
