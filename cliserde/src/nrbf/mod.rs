pub mod class_name;
pub mod bridge;
pub mod handlers;
pub mod records;
mod errors;
mod readers;

use std::io::Read;

pub use bridge::Bridge;
pub use errors::{BridgeError, DecodeError};
pub use handlers::{DecodeResult, Deserializer};

use crate::cli::{CliContext, CliValue};

/// Decodes an NRBF stream into its intermediate record graph.
pub fn decode<R: Read>(f: &mut R) -> Result<DecodeResult, DecodeError> {
	Deserializer::new().deserialize(f)
}

/// Decodes an NRBF stream and lowers the root object into the common value
/// model.
pub fn decode_value<'l, R: Read>(
	cli: &'l CliContext<'l>,
	f: &mut R,
) -> Result<CliValue<'l>, BridgeError> {
	let result = decode(f)?;
	Bridge::new(cli, &result)?.root()
}
