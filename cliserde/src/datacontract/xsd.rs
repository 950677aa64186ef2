use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, SecondsFormat};
use rust_decimal::Decimal;

use crate::cli::{Builtins, CliDateTime, CliRaw, CliTypeInstance, CliValue};
use crate::datacontract::errors::{invalid, DataContractError};

pub(crate) fn parse_bool(value: &str) -> Result<bool, DataContractError> {
	let value = value.trim();
	if value.eq_ignore_ascii_case("true") || value == "1" {
		Ok(true)
	} else if value.eq_ignore_ascii_case("false") || value == "0" {
		Ok(false)
	} else {
		Err(DataContractError::InvalidBoolean(value.to_string()))
	}
}

/// Converters between XSD lexical forms and basic values, one pair per
/// supported XSD type name.
pub struct XsdSerializers<'l> {
	builtins: Builtins<'l>,
}

impl<'l> XsdSerializers<'l> {
	pub fn new(builtins: &Builtins<'l>) -> Self {
		XsdSerializers { builtins: *builtins }
	}

	/// The value type an empty lexical form defaults to.
	pub(crate) fn cli_type_for(&self, xsd_type: &str) -> Result<&'l CliTypeInstance<'l>, DataContractError> {
		match xsd_type {
			"dateTime" => Ok(self.builtins.date_time),
			"base64Binary" => Ok(self.builtins.byte_array),
			"long" => Ok(self.builtins.int32),
			"double" => Ok(self.builtins.double),
			"decimal" => Ok(self.builtins.decimal),
			"bool" => Ok(self.builtins.boolean),
			"string" => Ok(self.builtins.string),
			_ => Err(DataContractError::UnknownXsdType(xsd_type.to_string())),
		}
	}

	pub fn deserialize(&self, xsd_type: &str, value: &str) -> Result<CliValue<'l>, DataContractError> {
		match xsd_type {
			"dateTime" => self.deserialize_date_time(value),
			"base64Binary" => self.deserialize_base64(value),
			"long" => self.deserialize_long(value),
			"double" => self.deserialize_double(value),
			"decimal" => self.deserialize_decimal(value),
			"bool" => Ok(self.builtins.boolean.basic_value(CliRaw::Boolean(parse_bool(value)?))),
			"string" => {
				let interned = self.builtins.cli().intern_str(value);
				Ok(self.builtins.string.basic_value(CliRaw::String(interned)))
			},
			_ => Err(DataContractError::UnknownXsdType(xsd_type.to_string())),
		}
	}

	pub fn serialize(&self, xsd_type: &str, value: CliValue<'l>) -> Result<String, DataContractError> {
		let Some(basic) = value.as_basic() else {
			return Err(invalid("only basic values have a lexical form"));
		};
		match (xsd_type, basic.value()) {
			("dateTime", CliRaw::DateTime(dt)) => {
				let Some(utc) = dt.to_utc() else {
					return Err(invalid("cannot serialize a datetime of unspecified kind"));
				};
				Ok(utc.to_rfc3339_opts(SecondsFormat::AutoSi, true))
			},
			("base64Binary", CliRaw::Bytes(bytes)) => Ok(BASE64.encode(bytes)),
			("long", CliRaw::Int32(v)) => Ok(v.to_string()),
			("long", CliRaw::Int64(v)) => Ok(v.to_string()),
			("double", CliRaw::Double(v)) => Ok(v.to_string()),
			("decimal", CliRaw::Decimal(v)) => Ok(v.to_string()),
			("bool", CliRaw::Boolean(v)) => Ok(if v { "true" } else { "false" }.to_string()),
			("string", CliRaw::String(v)) => Ok(v.to_string()),
			(xsd_type, _) => Err(invalid(format!(
				"{} cannot be serialized as {xsd_type}",
				basic.type_instance()
			))),
		}
	}

	fn deserialize_date_time(&self, value: &str) -> Result<CliValue<'l>, DataContractError> {
		let value = value.trim();
		let dt = match DateTime::parse_from_rfc3339(value) {
			Ok(dt) => CliDateTime::Local(dt),
			// No offset designator: the timestamp is taken as UTC.
			Err(_) => match NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
				Ok(naive) => CliDateTime::Utc(naive.and_utc()),
				Err(_) => return Err(invalid(format!("invalid dateTime literal: {value}"))),
			},
		};
		Ok(self.builtins.date_time.basic_value(CliRaw::DateTime(dt)))
	}

	fn deserialize_base64(&self, value: &str) -> Result<CliValue<'l>, DataContractError> {
		let condensed = value
			.chars()
			.filter(|c| !c.is_ascii_whitespace())
			.collect::<String>();
		let bytes = BASE64
			.decode(condensed.as_bytes())
			.map_err(|e| invalid(format!("invalid base64Binary literal: {e}")))?;
		let bytes = self.builtins.cli().bump().alloc_slice_copy(&bytes);
		Ok(self.builtins.byte_array.basic_value(CliRaw::Bytes(bytes)))
	}

	fn deserialize_long(&self, value: &str) -> Result<CliValue<'l>, DataContractError> {
		let parsed = value
			.trim()
			.parse::<i64>()
			.map_err(|_| invalid(format!("invalid integer literal: {value}")))?;
		// Values representable in 32 bits narrow to Int32.
		Ok(match i32::try_from(parsed) {
			Ok(narrow) => self.builtins.int32.basic_value(CliRaw::Int32(narrow)),
			Err(_) => self.builtins.int64.basic_value(CliRaw::Int64(parsed)),
		})
	}

	fn deserialize_double(&self, value: &str) -> Result<CliValue<'l>, DataContractError> {
		let parsed = value
			.trim()
			.parse::<f64>()
			.map_err(|_| invalid(format!("invalid double literal: {value}")))?;
		Ok(self.builtins.double.basic_value(CliRaw::Double(parsed)))
	}

	fn deserialize_decimal(&self, value: &str) -> Result<CliValue<'l>, DataContractError> {
		let parsed = Decimal::from_str(value.trim())
			.map_err(|_| invalid(format!("invalid decimal literal: {value}")))?;
		Ok(self.builtins.decimal.basic_value(CliRaw::Decimal(parsed)))
	}
}

#[cfg(test)]
mod tests {
	use chrono::{Duration, TimeZone, Utc};

	use super::*;
	use crate::cli::{Builtins, CliContext};

	#[test]
	fn long_values_narrow_to_int32_when_possible() {
		let cli = CliContext::new();
		let builtins = Builtins::new(&cli).unwrap();
		let xsd = XsdSerializers::new(&builtins);

		let cases = [
			("0", CliRaw::Int32(0)),
			("2147483647", CliRaw::Int32(i32::MAX)),
			("2147483648", CliRaw::Int64(2_147_483_648)),
			("-2147483648", CliRaw::Int32(i32::MIN)),
			("-2147483649", CliRaw::Int64(-2_147_483_649)),
		];
		for (literal, expected) in cases {
			assert_eq!(xsd.deserialize("long", literal).unwrap().raw(), Some(expected));
		}
		assert!(xsd.deserialize("long", "twelve").is_err());
	}

	#[test]
	fn booleans_accept_the_two_lexical_forms() {
		let cli = CliContext::new();
		let builtins = Builtins::new(&cli).unwrap();
		let xsd = XsdSerializers::new(&builtins);

		for literal in ["true", "TRUE", "1"] {
			assert_eq!(xsd.deserialize("bool", literal).unwrap().raw(), Some(CliRaw::Boolean(true)));
		}
		for literal in ["false", "False", "0"] {
			assert_eq!(xsd.deserialize("bool", literal).unwrap().raw(), Some(CliRaw::Boolean(false)));
		}
		assert!(matches!(
			xsd.deserialize("bool", "yes"),
			Err(DataContractError::InvalidBoolean(_))
		));
	}

	#[test]
	fn base64_decodes_through_surrounding_whitespace() {
		let cli = CliContext::new();
		let builtins = Builtins::new(&cli).unwrap();
		let xsd = XsdSerializers::new(&builtins);

		let value = xsd.deserialize("base64Binary", "\n    AQIDBA==\n").unwrap();
		assert_eq!(value.raw(), Some(CliRaw::Bytes(&[1, 2, 3, 4])));
		assert!(value.type_instance() == builtins.byte_array);
		assert!(xsd.deserialize("base64Binary", "!!").is_err());
	}

	#[test]
	fn date_times_parse_with_and_without_offsets() {
		let cli = CliContext::new();
		let builtins = Builtins::new(&cli).unwrap();
		let xsd = XsdSerializers::new(&builtins);

		let expected = Utc.with_ymd_and_hms(2022, 8, 8, 13, 57, 56).unwrap()
			+ Duration::microseconds(192121);

		let offset = xsd.deserialize("dateTime", "2022-08-08T22:57:56.192121+09:00").unwrap();
		let Some(CliRaw::DateTime(dt)) = offset.raw() else {
			panic!("expected a datetime payload");
		};
		assert_eq!(dt.to_utc(), Some(expected));

		let zulu = xsd.deserialize("dateTime", "2022-08-08T13:57:56.192121Z").unwrap();
		let Some(CliRaw::DateTime(dt)) = zulu.raw() else {
			panic!("expected a datetime payload");
		};
		assert_eq!(dt.to_utc(), Some(expected));

		let naive = xsd.deserialize("dateTime", "2022-08-08T13:57:56.192121").unwrap();
		let Some(CliRaw::DateTime(dt)) = naive.raw() else {
			panic!("expected a datetime payload");
		};
		assert_eq!(dt.to_utc(), Some(expected));

		assert!(xsd.deserialize("dateTime", "yesterday").is_err());
	}

	#[test]
	fn decimals_keep_their_precision() {
		let cli = CliContext::new();
		let builtins = Builtins::new(&cli).unwrap();
		let xsd = XsdSerializers::new(&builtins);

		let value = xsd.deserialize("decimal", "3.1415926535897932384626433833").unwrap();
		let Some(CliRaw::Decimal(decimal)) = value.raw() else {
			panic!("expected a decimal payload");
		};
		assert_eq!(decimal.to_string(), "3.1415926535897932384626433833");
	}

	#[test]
	fn serialization_is_the_lexical_inverse() {
		let cli = CliContext::new();
		let builtins = Builtins::new(&cli).unwrap();
		let xsd = XsdSerializers::new(&builtins);

		let long = xsd.deserialize("long", "12").unwrap();
		assert_eq!(xsd.serialize("long", long).unwrap(), "12");

		let bytes = xsd.deserialize("base64Binary", "AQIDBA==").unwrap();
		assert_eq!(xsd.serialize("base64Binary", bytes).unwrap(), "AQIDBA==");

		let flag = xsd.deserialize("bool", "1").unwrap();
		assert_eq!(xsd.serialize("bool", flag).unwrap(), "true");

		assert!(xsd.serialize("long", flag).is_err());
	}

	#[test]
	fn unknown_types_are_rejected() {
		let cli = CliContext::new();
		let builtins = Builtins::new(&cli).unwrap();
		let xsd = XsdSerializers::new(&builtins);
		assert!(matches!(
			xsd.deserialize("gYearMonth", "2022-08"),
			Err(DataContractError::UnknownXsdType(_))
		));
	}
}
