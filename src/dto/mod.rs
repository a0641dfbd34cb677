//! Wire and REST data transfer objects.

pub mod event;
pub mod health;
pub mod http;
pub mod packet;
pub mod push;
pub mod request;
pub mod response;
pub mod validation;
