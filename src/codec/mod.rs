//! Pure, stateless codecs: the event-payload decoder and the address
//! encoding converter.

pub mod abi;
pub mod address;

pub use abi::{decode_event_payload, decode_log_event, decode_log_text, parse_payload_text};
pub use address::{to_bech32, AddressCodecError};
