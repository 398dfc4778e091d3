use nom::{
	branch::alt,
	bytes::complete::{tag, take_till, take_while1},
	character::complete::{char, space1},
	combinator::{eof, opt},
	multi::separated_list0,
	sequence::{delimited, pair, preceded, separated_pair},
	IResult,
};

fn is_key_char(chr: char) -> bool {
	chr.is_ascii_alphanumeric() || chr == '_' || chr == '.'
}

fn is_value_end(chr: char) -> bool {
	chr == ' ' || chr == '\t' || chr == '\n' || chr == '\r'
}

fn quoted_value(input: &str) -> IResult<&str, &str> {
	delimited(char('"'), take_till(|c| c == '"'), char('"'))(input)
}

fn bare_value(input: &str) -> IResult<&str, &str> {
	take_till(is_value_end)(input)
}

fn key_value(input: &str) -> IResult<&str, (&str, &str)> {
	separated_pair(
		take_while1(is_key_char),
		char('='),
		alt((quoted_value, bare_value)),
	)(input)
}

fn keys_and_values(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
	separated_list0(space1, key_value)(input)
}

// Replies arrive as one line; a trailing newline may already have been
// stripped by the reader, and some bridges pad the line with spaces.
fn line_end(input: &str) -> IResult<&str, &str> {
	preceded(opt(space1), alt((tag("\n"), eof)))(input)
}

fn reply<'a>(
	prefix: &'static str,
	input: &'a str,
) -> IResult<&'a str, Vec<(&'a str, &'a str)>> {
	let (input, (opts, _)) = preceded(tag(prefix), pair(keys_and_values, line_end))(input)?;
	Ok((input, opts))
}

pub fn sam_hello(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
	reply("HELLO REPLY ", input)
}

pub fn sam_session_status(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
	reply("SESSION STATUS ", input)
}

pub fn sam_stream_status(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
	reply("STREAM STATUS ", input)
}

pub fn sam_naming_reply(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
	reply("NAMING REPLY ", input)
}

pub fn sam_dest_reply(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
	reply("DEST REPLY ", input)
}

pub fn sam_raw_status(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
	reply("RAW STATUS ", input)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hello() {
		assert_eq!(
			sam_hello("HELLO REPLY RESULT=OK VERSION=3.3\n"),
			Ok(("", vec![("RESULT", "OK"), ("VERSION", "3.3")]))
		);
		assert_eq!(
			sam_hello("HELLO REPLY RESULT=NOVERSION\n"),
			Ok(("", vec![("RESULT", "NOVERSION")]))
		);
		assert_eq!(
			sam_hello("HELLO REPLY RESULT=I2P_ERROR MESSAGE=\"Something failed\"\n"),
			Ok((
				"",
				vec![("RESULT", "I2P_ERROR"), ("MESSAGE", "Something failed")]
			))
		);
	}

	#[test]
	fn hello_without_newline() {
		assert_eq!(
			sam_hello("HELLO REPLY RESULT=OK VERSION=3.3"),
			Ok(("", vec![("RESULT", "OK"), ("VERSION", "3.3")]))
		);
	}

	#[test]
	fn session_status() {
		assert_eq!(
			sam_session_status("SESSION STATUS RESULT=OK DESTINATION=privkey\n"),
			Ok(("", vec![("RESULT", "OK"), ("DESTINATION", "privkey")]))
		);
		assert_eq!(
			sam_session_status("SESSION STATUS RESULT=DUPLICATED_ID\n"),
			Ok(("", vec![("RESULT", "DUPLICATED_ID")]))
		);
	}

	#[test]
	fn stream_status() {
		assert_eq!(
			sam_stream_status("STREAM STATUS RESULT=OK\n"),
			Ok(("", vec![("RESULT", "OK")]))
		);
		assert_eq!(
			sam_stream_status(
				"STREAM STATUS RESULT=CANT_REACH_PEER MESSAGE=\"Can't reach peer\"\n"
			),
			Ok((
				"",
				vec![
					("RESULT", "CANT_REACH_PEER"),
					("MESSAGE", "Can't reach peer")
				]
			))
		);
	}

	#[test]
	fn naming_reply() {
		assert_eq!(
			sam_naming_reply("NAMING REPLY RESULT=OK NAME=name VALUE=dest\n"),
			Ok((
				"",
				vec![("RESULT", "OK"), ("NAME", "name"), ("VALUE", "dest")]
			))
		);
		assert_eq!(
			sam_naming_reply("NAMING REPLY RESULT=KEY_NOT_FOUND\n"),
			Ok(("", vec![("RESULT", "KEY_NOT_FOUND")]))
		);
		assert!(sam_naming_reply("NAMINGREPLY RESULT=KEY_NOT_FOUND\n").is_err());
		assert!(sam_naming_reply("NAMING  REPLY RESULT=KEY_NOT_FOUND\n").is_err());
	}

	#[test]
	fn dest_reply() {
		assert_eq!(
			sam_dest_reply("DEST REPLY PUB=foo PRIV=foobar\n"),
			Ok(("", vec![("PUB", "foo"), ("PRIV", "foobar")]))
		);
	}

	#[test]
	fn raw_status() {
		assert_eq!(
			sam_raw_status("RAW STATUS RESULT=OK\n"),
			Ok(("", vec![("RESULT", "OK")]))
		);
		assert_eq!(
			sam_raw_status("RAW STATUS RESULT=I2P_ERROR MESSAGE=\"no tunnels\"\n"),
			Ok(("", vec![("RESULT", "I2P_ERROR"), ("MESSAGE", "no tunnels")]))
		);
		assert!(sam_raw_status("STREAM STATUS RESULT=OK\n").is_err());
	}

	#[test]
	fn dotted_keys_and_trailing_space() {
		assert_eq!(
			sam_session_status("SESSION STATUS RESULT=OK inbound.length=2 \n"),
			Ok(("", vec![("RESULT", "OK"), ("inbound.length", "2")]))
		);
	}
}
