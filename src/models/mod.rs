pub mod ids;
pub mod responses;
