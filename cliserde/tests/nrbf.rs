use std::io::Cursor;

use chrono::{TimeZone, Utc};
use cliserde::cli::{CliContext, CliRaw, CliValue};
use cliserde::nrbf::records::{Instance, NrbfObject};
use cliserde::nrbf::{self, Bridge, DecodeError};

const SOME_ASSEMBLY: &str = "SomeAssembly, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null";
const LIST_OF_FOO: &str = "System.Collections.Generic.List`1[[Some.Name.Space.Foo, SomeAssembly, \
                           Version=1.0.0.0, Culture=neutral, PublicKeyToken=null]]";
const LIST_OF_DATETIME: &str = "System.Collections.Generic.List`1[[System.DateTime]]";
const DICTIONARY_OF_STRING_FOO: &str = "System.Collections.Generic.Dictionary`2[[System.String, \
                                        mscorlib, Version=4.0.0.0, Culture=neutral, \
                                        PublicKeyToken=b77a5c561934e089],[Some.Name.Space.Foo, \
                                        SomeAssembly, Version=1.0.0.0, Culture=neutral, \
                                        PublicKeyToken=null]]";
const KEY_VALUE_PAIR_OF_STRING_FOO: &str = "System.Collections.Generic.KeyValuePair`2[[System.String, \
                                            mscorlib, Version=4.0.0.0, Culture=neutral, \
                                            PublicKeyToken=b77a5c561934e089],[Some.Name.Space.Foo, \
                                            SomeAssembly, Version=1.0.0.0, Culture=neutral, \
                                            PublicKeyToken=null]]";

/// 2022-08-15T23:23:26.372019 in 100ns ticks since 0001-01-01.
const TICKS_2022_08_15: u64 = 0x08DA_7F15_27B7_6EFE;

#[derive(Default)]
struct Stream(Vec<u8>);

impl Stream {
	fn code(&mut self, code: u8) -> &mut Self {
		self.0.push(code);
		self
	}

	fn u8(&mut self, value: u8) -> &mut Self {
		self.0.push(value);
		self
	}

	fn i32(&mut self, value: i32) -> &mut Self {
		self.0.extend(value.to_le_bytes());
		self
	}

	fn u64(&mut self, value: u64) -> &mut Self {
		self.0.extend(value.to_le_bytes());
		self
	}

	fn str(&mut self, value: &str) -> &mut Self {
		let mut length = value.len() as u32;
		loop {
			let group = (length & 0x7F) as u8;
			length >>= 7;
			if length == 0 {
				self.0.push(group);
				break;
			}
			self.0.push(group | 0x80);
		}
		self.0.extend(value.as_bytes());
		self
	}

	fn header(&mut self, root_id: i32) -> &mut Self {
		self.code(0).i32(root_id).i32(-1).i32(1).i32(0)
	}

	fn library(&mut self, id: i32, name: &str) -> &mut Self {
		self.code(12).i32(id).str(name)
	}

	fn end(&mut self) -> &mut Self {
		self.code(11)
	}
}

/// `Some.Name.Space.Bar { foos: List<Foo>, dates: List<DateTime> }` with one
/// element in each list.
fn fixture_bar() -> Vec<u8> {
	let mut s = Stream::default();
	s.header(1).library(2, SOME_ASSEMBLY);

	// Root: ClassWithMembersAndTypes, two SystemClass members.
	s.code(5)
		.i32(1)
		.str("Some.Name.Space.Bar")
		.i32(2)
		.str("foos")
		.str("dates")
		.u8(3)
		.u8(3)
		.str(LIST_OF_FOO)
		.str(LIST_OF_DATETIME)
		.i32(2);
	s.code(9).i32(3);
	s.code(9).i32(4);

	// List<Foo>: SystemClassWithMembersAndTypes with the canonical backing
	// array and element count.
	s.code(4)
		.i32(3)
		.str(LIST_OF_FOO)
		.i32(2)
		.str("_items")
		.str("_size")
		.u8(2)
		.u8(0)
		.u8(8);
	s.code(9).i32(5);
	s.i32(1);

	// List<DateTime>.
	s.code(4)
		.i32(4)
		.str(LIST_OF_DATETIME)
		.i32(2)
		.str("_items")
		.str("_size")
		.u8(2)
		.u8(0)
		.u8(8);
	s.code(9).i32(6);
	s.i32(1);

	// Foo[] with one inline Foo instance.
	s.code(7).i32(5).u8(0).i32(1).i32(1).u8(4).str("Some.Name.Space.Foo").i32(2);
	s.code(5).i32(7).str("Some.Name.Space.Foo").i32(0).i32(2);

	// DateTime[] with one UTC timestamp.
	s.code(7).i32(6).u8(0).i32(1).i32(1).u8(0).u8(13);
	s.u64(TICKS_2022_08_15 | (1 << 62));

	s.end();
	s.0
}

/// `Some.Name.Space.Noo { foos: Dictionary<string, Foo> }` with one entry
/// and one null slot in the backing store.
fn fixture_noo() -> Vec<u8> {
	let mut s = Stream::default();
	s.header(1).library(2, SOME_ASSEMBLY);

	s.code(5)
		.i32(1)
		.str("Some.Name.Space.Noo")
		.i32(1)
		.str("foos")
		.u8(3)
		.str(DICTIONARY_OF_STRING_FOO)
		.i32(2);
	s.code(9).i32(2);

	// Dictionary<string, Foo>: the canonical four-member layout with the
	// entries array at member index 3.
	s.code(4)
		.i32(2)
		.str(DICTIONARY_OF_STRING_FOO)
		.i32(4)
		.str("Version")
		.str("Comparer")
		.str("HashSize")
		.str("KeyValuePairs")
		.u8(0)
		.u8(2)
		.u8(0)
		.u8(2)
		.u8(8)
		.u8(8);
	s.i32(1);
	s.code(10);
	s.i32(3);
	s.code(9).i32(3);

	// KeyValuePair[] with one entry and one null slot.
	s.code(7).i32(3).u8(0).i32(1).i32(2).u8(3).str(KEY_VALUE_PAIR_OF_STRING_FOO);
	s.code(4)
		.i32(4)
		.str(KEY_VALUE_PAIR_OF_STRING_FOO)
		.i32(2)
		.str("key")
		.str("value")
		.u8(1)
		.u8(4)
		.str("Some.Name.Space.Foo")
		.i32(2);
	s.code(6).i32(5).str("test");
	s.code(5).i32(6).str("Some.Name.Space.Foo").i32(0).i32(2);
	s.code(10);

	s.end();
	s.0
}

/// `Some.Name.Space.Node { next: object }` pointing at itself.
fn fixture_self_reference() -> Vec<u8> {
	let mut s = Stream::default();
	s.header(1).library(2, SOME_ASSEMBLY);
	s.code(5).i32(1).str("Some.Name.Space.Node").i32(1).str("next").u8(2).i32(2);
	s.code(9).i32(1);
	s.end();
	s.0
}

#[test]
fn decode_fills_the_object_table() {
	let result = nrbf::decode(&mut Cursor::new(fixture_bar())).unwrap();
	assert_eq!(result.root_id(), Some(1));
	assert_eq!(result.header_id(), Some(-1));
	assert_eq!(result.major_version(), Some(1));
	assert_eq!(result.minor_version(), Some(0));
	assert!(matches!(result.object(1), Some(NrbfObject::Instance(Instance { .. }))));
	assert_eq!(result.library_name(2), Some(SOME_ASSEMBLY));
}

#[test]
fn bridge_lowers_lists_of_classes_and_datetimes() {
	let result = nrbf::decode(&mut Cursor::new(fixture_bar())).unwrap();
	let cli = CliContext::new();
	let bridge = Bridge::new(&cli, &result).unwrap();
	let root = bridge.root().unwrap();

	let root = root.as_composite().expect("the root must be a composite object");
	assert_eq!(root.type_instance().to_string(), "Some.Name.Space.Bar");
	assert_eq!(root.members().len(), 2);

	let foos = root.member("foos").unwrap();
	assert_eq!(
		foos.type_instance().derived_from().to_string(),
		"System.Collections.Generic.List<Some.Name.Space.Foo>"
	);
	let Some(CliRaw::Values(elements)) = foos.raw() else {
		panic!("the list must lower to a basic value holding its elements");
	};
	assert_eq!(elements.len(), 1);
	let foo = elements[0].as_composite().expect("the element must be a composite object");
	assert_eq!(foo.type_instance().to_string(), "Some.Name.Space.Foo");

	let dates = root.member("dates").unwrap();
	assert_eq!(
		dates.type_instance().derived_from().to_string(),
		"System.Collections.Generic.List<System.DateTime>"
	);
	let Some(CliRaw::Values(elements)) = dates.raw() else {
		panic!("the list must lower to a basic value holding its elements");
	};
	assert_eq!(elements.len(), 1);
	let Some(CliRaw::DateTime(date)) = elements[0].raw() else {
		panic!("the element must be a datetime");
	};
	let expected = Utc.with_ymd_and_hms(2022, 8, 15, 23, 23, 26).unwrap()
		+ chrono::Duration::microseconds(372019);
	assert_eq!(date.to_utc(), Some(expected));
}

#[test]
fn bridge_compacts_dictionaries_into_pairs() {
	let result = nrbf::decode(&mut Cursor::new(fixture_noo())).unwrap();
	let cli = CliContext::new();
	let bridge = Bridge::new(&cli, &result).unwrap();
	let root = bridge.root().unwrap();

	let root = root.as_composite().expect("the root must be a composite object");
	assert_eq!(root.type_instance().to_string(), "Some.Name.Space.Noo");
	assert_eq!(root.members().len(), 1);

	let foos = root.member("foos").unwrap();
	assert_eq!(
		foos.type_instance().to_string(),
		"System.Collections.Generic.Dictionary<System.String, Some.Name.Space.Foo>"
	);
	let Some(CliRaw::Pairs(pairs)) = foos.raw() else {
		panic!("the dictionary must lower to a sequence of pairs");
	};
	assert_eq!(pairs.len(), 1);
	assert_eq!(pairs[0][0].raw(), Some(CliRaw::String("test")));
	assert_eq!(pairs[0][1].type_instance().to_string(), "Some.Name.Space.Foo");
}

#[test]
fn self_references_converge_on_one_identity() {
	let result = nrbf::decode(&mut Cursor::new(fixture_self_reference())).unwrap();
	let cli = CliContext::new();
	let bridge = Bridge::new(&cli, &result).unwrap();
	let root = bridge.root().unwrap();

	let node = root.as_composite().expect("the root must be a composite object");
	assert_eq!(node.members().len(), 1);
	// Traversal terminates and the member is the very same object.
	assert_eq!(node.member("next").unwrap(), root);
	assert_eq!(bridge.get(1).unwrap(), root);
}

#[test]
fn repeated_references_share_the_converted_value() {
	let mut s = Stream::default();
	s.header(1).library(2, SOME_ASSEMBLY);
	s.code(5)
		.i32(1)
		.str("Some.Name.Space.Twin")
		.i32(2)
		.str("left")
		.str("right")
		.u8(2)
		.u8(2)
		.i32(2);
	s.code(6).i32(3).str("shared");
	s.code(9).i32(3);
	s.end();

	let result = nrbf::decode(&mut Cursor::new(std::mem::take(&mut s.0))).unwrap();
	let cli = CliContext::new();
	let bridge = Bridge::new(&cli, &result).unwrap();
	let root = bridge.root().unwrap();

	let twin = root.as_composite().unwrap();
	let left = twin.member("left").unwrap();
	let right = twin.member("right").unwrap();
	assert_eq!(left.raw(), Some(CliRaw::String("shared")));
	assert_eq!(left, right);
	assert!(matches!(left, CliValue::Basic(_)));
}

#[test]
fn unknown_records_and_short_headers_fail() {
	assert!(matches!(
		nrbf::decode(&mut Cursor::new(vec![0xFFu8])),
		Err(DecodeError::UnknownRecord(255))
	));
	assert!(matches!(
		nrbf::decode(&mut Cursor::new(vec![0u8, 1, 0, 0, 0])),
		Err(DecodeError::UnexpectedEof { expected: 16, actual: 4 })
	));
}
