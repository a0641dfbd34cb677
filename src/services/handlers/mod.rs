//! Registry handlers, grouped by packet family.

pub mod events;
pub mod relay;
pub mod requests;

#[cfg(test)]
mod tests;

use crate::{dto::packet::Packet, error::ServiceError};

/// Error for a packet routed to a handler of another shape.
fn unexpected(packet: &Packet) -> ServiceError {
    ServiceError::InvalidInput(format!(
        "unexpected payload {:?}/{:?}",
        packet.case(),
        packet.sub_case()
    ))
}
