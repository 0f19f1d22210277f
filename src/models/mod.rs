pub mod carrier;
pub mod event;
pub mod request;
