pub mod handlers;
pub mod models;
pub mod xsd;
mod deserialization;
mod errors;

use std::io::BufRead;

pub use deserialization::Deserializer;
pub use errors::DataContractError;

use crate::cli::{Builtins, CliValue};
use crate::datacontract::models::MemberDescriptor;

/// Decodes a data contract XML document against `root`, the descriptor of
/// its root element.
pub fn decode<'l, R: BufRead>(
	builtins: &Builtins<'l>,
	input: R,
	root: &MemberDescriptor<'l>,
) -> Result<CliValue<'l>, DataContractError> {
	Deserializer::new(builtins).deserialize(input, root)
}

pub fn decode_str<'l>(
	builtins: &Builtins<'l>,
	xml: &str,
	root: &MemberDescriptor<'l>,
) -> Result<CliValue<'l>, DataContractError> {
	Deserializer::new(builtins).deserialize_str(xml, root)
}
