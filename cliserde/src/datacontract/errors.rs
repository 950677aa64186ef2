use crate::cli::CliError;

#[derive(Debug, thiserror::Error)]
pub enum DataContractError {
	#[error("invalid data contract payload: {0}")]
	InvalidPayload(String),

	#[error("invalid boolean literal: {0}")]
	InvalidBoolean(String),

	#[error("unknown XSD type: {0}")]
	UnknownXsdType(String),

	#[error("not implemented: {0}")]
	NotImplemented(String),

	#[error("malformed XML: {0}")]
	Xml(#[from] quick_xml::Error),

	#[error("malformed XML attribute: {0}")]
	Attr(#[from] quick_xml::events::attributes::AttrError),

	#[error("malformed XML escape: {0}")]
	Escape(#[from] quick_xml::escape::EscapeError),

	#[error(transparent)]
	Type(#[from] CliError),
}

pub(crate) fn invalid(message: impl Into<String>) -> DataContractError {
	DataContractError::InvalidPayload(message.into())
}
