pub mod bodies;
pub mod responses;
pub mod shared;
