//! Field and method descriptor utilities.
//!
//! Descriptors are never parsed into a tree: the emitter and the frame engine
//! only ever need slot sizes and the raw substrings of parameter and return
//! types, so that is all this module computes.

use crate::errors::{Error, Result};

/// Number of local/stack slots occupied by a value of the given field type
/// (`J` and `D` take two slots, everything else one).
pub(crate) fn type_size(desc: &str) -> i32 {
    match desc.as_bytes().first() {
        Some(b'J') | Some(b'D') => 2,
        _ => 1,
    }
}

/// Total slot size of a method's arguments and of its return value.
///
/// `(I[JLjava/lang/String;)D` has argument size 4 and return size 2; a `V`
/// return has size 0.
pub(crate) fn argument_and_return_sizes(desc: &str) -> Result<(i32, i32)> {
    let mut args = 0;
    let mut rest = strip_prefix(desc, '(')?;
    loop {
        if let Some(after) = rest.strip_prefix(')') {
            let ret = match after.as_bytes().first() {
                Some(b'V') => 0,
                Some(b'J') | Some(b'D') => 2,
                Some(_) => 1,
                None => return Err(bad_descriptor(desc)),
            };
            return Ok((args, ret));
        }
        let (ty, after) = split_first_type(rest).ok_or_else(|| bad_descriptor(desc))?;
        args += type_size(ty);
        rest = after;
    }
}

/// Split a method descriptor into its parameter type substrings.
pub(crate) fn argument_types(desc: &str) -> Result<Vec<&str>> {
    let mut types = vec![];
    let mut rest = strip_prefix(desc, '(')?;
    while !rest.starts_with(')') {
        let (ty, after) = split_first_type(rest).ok_or_else(|| bad_descriptor(desc))?;
        types.push(ty);
        rest = after;
    }
    Ok(types)
}

/// The return type substring of a method descriptor (after the `)`).
pub(crate) fn return_type(desc: &str) -> Result<&str> {
    let close = desc.find(')').ok_or_else(|| bad_descriptor(desc))?;
    Ok(&desc[close + 1..])
}

/// Split the first field type off the front of a descriptor tail.
fn split_first_type(rest: &str) -> Option<(&str, &str)> {
    let bytes = rest.as_bytes();
    let mut i = 0;
    while *bytes.get(i)? == b'[' {
        i += 1;
    }
    match *bytes.get(i)? {
        b'L' => {
            let semi = rest[i..].find(';')? + i;
            Some((&rest[..semi + 1], &rest[semi + 1..]))
        }
        b'Z' | b'B' | b'C' | b'S' | b'I' | b'F' | b'J' | b'D' => {
            Some((&rest[..i + 1], &rest[i + 1..]))
        }
        _ => None,
    }
}

fn strip_prefix(desc: &str, prefix: char) -> Result<&str> {
    desc.strip_prefix(prefix).ok_or_else(|| bad_descriptor(desc))
}

fn bad_descriptor(desc: &str) -> Error {
    Error::IllegalState(format!("invalid descriptor {:?}", desc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_sizes() {
        assert_eq!(argument_and_return_sizes("()V").unwrap(), (0, 0));
        assert_eq!(argument_and_return_sizes("()I").unwrap(), (0, 1));
        assert_eq!(argument_and_return_sizes("(IJ)D").unwrap(), (3, 2));
        assert_eq!(
            argument_and_return_sizes("(I[JLjava/lang/String;)D").unwrap(),
            (3, 2)
        );
        assert_eq!(
            argument_and_return_sizes("([[Ljava/lang/Object;Z)Ljava/lang/Object;").unwrap(),
            (2, 1)
        );
    }

    #[test]
    fn argument_type_slices() {
        assert_eq!(
            argument_types("(I[JLjava/lang/String;)D").unwrap(),
            vec!["I", "[J", "Ljava/lang/String;"]
        );
        assert_eq!(argument_types("()V").unwrap(), Vec::<&str>::new());
    }

    #[test]
    fn malformed_descriptors_are_rejected() {
        assert!(argument_and_return_sizes("(").is_err());
        assert!(argument_and_return_sizes("I").is_err());
        assert!(argument_and_return_sizes("(Q)V").is_err());
        assert!(argument_and_return_sizes("()").is_err());
    }

    #[test]
    fn return_types() {
        assert_eq!(return_type("(II)V").unwrap(), "V");
        assert_eq!(return_type("()[I").unwrap(), "[I");
    }
}
