use crate::cli::CliError;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
	#[error("unexpected end of stream. expected {expected} bytes, but only found {actual} bytes.")]
	UnexpectedEof { expected: usize, actual: usize },

	#[error("unknown record code {0}")]
	UnknownRecord(u8),

	#[error("this implementation only supports version 1.0 streams; got {major}.{minor}")]
	VersionMismatch { major: i32, minor: i32 },

	#[error("invalid stream: {0}")]
	InvalidStream(String),

	#[error("invalid length prefix")]
	InvalidLengthPrefix,

	#[error("unknown datetime kind: {0}")]
	InvalidDateTimeKind(u8),

	#[error("unresolvable library id {0}")]
	UnresolvableLibraryId(i32),

	#[error("not implemented: {0}")]
	NotImplemented(&'static str),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
	#[error("invalid class name: {0}")]
	InvalidClassName(String),

	#[error("invalid number of type parameters for {name}: {expected} expected, got {got}")]
	ArityMismatch { name: String, expected: usize, got: usize },

	#[error("no root object id in the decoded stream")]
	MissingRootId,

	#[error("no object with id {0} in the decoded stream")]
	UnknownObjectId(i32),

	#[error("unresolvable library id {0}")]
	UnresolvableLibraryId(i32),

	#[error("unsupported value: {0}")]
	UnsupportedValue(String),

	#[error("not implemented: {0}")]
	NotImplemented(&'static str),

	#[error(transparent)]
	Type(#[from] CliError),

	#[error(transparent)]
	Decode(#[from] DecodeError),
}
