//! Address codec: the chain addresses one account under two encodings, the
//! EVM hex form and a bech32 form. The structured indexer keys traders by
//! the bech32 form; everything chain-side uses hex.

use bech32::{Bech32, Hrp};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AddressCodecError {
    #[error("invalid hex address: {0}")]
    InvalidHex(String),
    #[error("invalid bech32 prefix: {0}")]
    InvalidPrefix(String),
    #[error("bech32 encoding failed: {0}")]
    Encode(String),
}

/// Convert a 20-byte hex address (case-insensitive, optional `0x`) to its
/// bech32 form under the given human-readable prefix.
///
/// No semantic validation beyond hex decodability; callers gate the format
/// at the API boundary.
pub fn to_bech32(hex_addr: &str, prefix: &str) -> Result<String, AddressCodecError> {
    let hex_part = hex_addr.trim().trim_start_matches("0x");
    let bytes = hex::decode(hex_part)
        .map_err(|e| AddressCodecError::InvalidHex(format!("{}: {}", hex_addr, e)))?;
    let hrp =
        Hrp::parse(prefix).map_err(|e| AddressCodecError::InvalidPrefix(format!("{}", e)))?;
    bech32::encode::<Bech32>(hrp, &bytes).map_err(|e| AddressCodecError::Encode(e.to_string()))
}
