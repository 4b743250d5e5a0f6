pub mod courier;
pub mod delivery;
pub mod offer;
pub mod request;
