use std::fs::File;
use std::io::BufReader;

use cliserde::cli::CliContext;
use cliserde::nrbf::{self, Bridge};

fn main() {
	let path = std::env::args().nth(1).expect("usage: cliserde <payload.bin>");
	let mut stream = BufReader::new(File::open(path).unwrap());
	let result = nrbf::decode(&mut stream).unwrap();

	let cli = CliContext::new();
	let bridge = Bridge::new(&cli, &result).unwrap();
	println!("{:#?}", bridge.root().unwrap());
}
