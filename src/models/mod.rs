pub mod coordinate;
pub mod courier;
pub mod order;
pub mod position;
