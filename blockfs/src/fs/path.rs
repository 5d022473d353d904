use super::layout::NAME_MAX;
use crate::vfs::{Error, Path, Result};
use nom::bytes::complete::take_till;
use nom::character::complete::char;
use nom::combinator::all_consuming;
use nom::multi::many0;
use nom::sequence::preceded;
use nom::IResult;

fn components(input: &str) -> IResult<&str, Vec<&str>> {
    all_consuming(many0(preceded(char('/'), take_till(|c| c == '/'))))(input)
}

/// Split an absolute path into its raw components. `/` yields no components.
///
/// Components are not validated here, so `/a//b/` gives `["a", "", "b", ""]`.
pub fn split_path(path: &Path) -> Result<Vec<&str>> {
    if path == "/" {
        return Ok(vec![]);
    }
    match components(path) {
        Ok((_, parts)) if !parts.is_empty() => Ok(parts),
        _ => Err(Error::InvalidPath),
    }
}

/// Check that `name` can be stored in a directory entry.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\0']) {
        return Err(Error::InvalidPath);
    }
    if name.len() > NAME_MAX {
        return Err(Error::NameTooLong);
    }
    Ok(())
}

/// Split and validate `path`.
pub fn parse_path(path: &Path) -> Result<Vec<&str>> {
    let parts = split_path(path)?;
    for name in &parts {
        validate_name(name)?;
    }
    Ok(parts)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split() {
        assert_eq!(split_path("/"), Ok(vec![]));
        assert_eq!(split_path("/a"), Ok(vec!["a"]));
        assert_eq!(split_path("/a/bc/d.txt"), Ok(vec!["a", "bc", "d.txt"]));
        assert_eq!(split_path("/a/"), Ok(vec!["a", ""]));
        assert_eq!(split_path("//a"), Ok(vec!["", "a"]));
        assert_eq!(split_path(""), Err(Error::InvalidPath));
        assert_eq!(split_path("a/b"), Err(Error::InvalidPath));
        assert_eq!(split_path("a"), Err(Error::InvalidPath));
    }

    #[test]
    fn validate() {
        assert_eq!(validate_name("file"), Ok(()));
        assert_eq!(validate_name(""), Err(Error::InvalidPath));
        assert_eq!(validate_name("nul\0"), Err(Error::InvalidPath));
        assert_eq!(validate_name(&"x".repeat(NAME_MAX)), Ok(()));
        assert_eq!(validate_name(&"x".repeat(NAME_MAX + 1)), Err(Error::NameTooLong));
    }

    #[test]
    fn parse() {
        assert_eq!(parse_path("/folder/file"), Ok(vec!["folder", "file"]));
        assert_eq!(parse_path("/folder/"), Err(Error::InvalidPath));
        assert_eq!(parse_path("/a//b"), Err(Error::InvalidPath));
        let long = format!("/{}", "n".repeat(NAME_MAX + 1));
        assert_eq!(parse_path(&long), Err(Error::NameTooLong));
    }
}
