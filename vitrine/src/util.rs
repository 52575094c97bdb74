//! Supporting helpers: byte-size parsing and POSIX path manipulation.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ByteSizeError {
    #[error("{input}: expected a positive integer with an optional SI suffix")]
    Malformed { input: String },
    #[error("{input}: suffix \"{suffix}\" must be one of \"\", \"k\", \"m\", \"g\" or \"t\"")]
    UnknownSuffix { input: String, suffix: String },
    #[error("{input}: value does not fit in 64 bits")]
    Overflow { input: String },
}

/// Convert a string holding a positive integer with an SI suffix (`4k`,
/// `100M`, `131G`) into a byte count. Suffixes are powers of 1000 and
/// case-insensitive; no suffix means bytes.
pub fn parse_byte_size(input: &str) -> Result<u64, ByteSizeError> {
    let digits_end = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, suffix) = input.split_at(digits_end);

    let mantissa: u64 = digits.parse().map_err(|_| ByteSizeError::Malformed {
        input: input.to_string(),
    })?;

    let scale: u64 = match suffix.to_ascii_lowercase().as_str() {
        "" => 1,
        "k" => 1_000,
        "m" => 1_000_000,
        "g" => 1_000_000_000,
        "t" => 1_000_000_000_000,
        _ => {
            return Err(ByteSizeError::UnknownSuffix {
                input: input.to_string(),
                suffix: suffix.to_string(),
            })
        }
    };

    mantissa
        .checked_mul(scale)
        .ok_or_else(|| ByteSizeError::Overflow {
            input: input.to_string(),
        })
}

/// Strip trailing slashes from a mount-relative path. The root stays `/`.
pub fn normalize(path: &str) -> &str {
    let stripped = path.trim_end_matches('/');
    if stripped.is_empty() {
        "/"
    } else {
        stripped
    }
}

/// POSIX dirname of a mount-relative path.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(at) => &path[..at],
    }
}

/// Last segment of a key or common prefix, surrounding slashes stripped.
pub fn basename(name: &str) -> &str {
    name.trim_matches('/').rsplit('/').next().unwrap_or("")
}

/// Expand a leading `~` to the user's home directory and resolve the
/// result against the current directory if it is still relative.
pub fn expand_path(path: &str) -> PathBuf {
    let home = dirs::home_dir();

    let expanded = match (path, &home) {
        ("~", Some(home)) => home.clone(),
        _ => match (path.strip_prefix("~/"), &home) {
            (Some(rest), Some(home)) => home.join(rest),
            _ => PathBuf::from(path),
        },
    };

    if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn byte_sizes_with_si_suffixes() {
        assert_eq!(parse_byte_size("100M"), Ok(100_000_000));
        assert_eq!(parse_byte_size("4k"), Ok(4_000));
        assert_eq!(parse_byte_size("4K"), Ok(4_000));
        assert_eq!(parse_byte_size("131G"), Ok(131_000_000_000));
        assert_eq!(parse_byte_size("2t"), Ok(2_000_000_000_000));
        assert_eq!(parse_byte_size("123"), Ok(123));
        assert_eq!(parse_byte_size("0"), Ok(0));
    }

    #[test]
    fn byte_size_rejects_garbage() {
        assert!(matches!(
            parse_byte_size(""),
            Err(ByteSizeError::Malformed { .. })
        ));
        assert!(matches!(
            parse_byte_size("M"),
            Err(ByteSizeError::Malformed { .. })
        ));
        assert!(matches!(
            parse_byte_size("12q"),
            Err(ByteSizeError::UnknownSuffix { .. })
        ));
        assert!(matches!(
            parse_byte_size("12kb"),
            Err(ByteSizeError::UnknownSuffix { .. })
        ));
        assert!(matches!(
            parse_byte_size("99999999t"),
            Err(ByteSizeError::Overflow { .. })
        ));
    }

    #[test]
    fn normalizing_strips_trailing_slashes() {
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("//"), "/");
        assert_eq!(normalize("/dir/"), "/dir");
        assert_eq!(normalize("/dir/sub.txt"), "/dir/sub.txt");
    }

    #[test]
    fn parents_of_nested_paths() {
        assert_eq!(parent("/a.txt"), "/");
        assert_eq!(parent("/dir/sub.txt"), "/dir");
        assert_eq!(parent("/dir/sub/deep"), "/dir/sub");
        assert_eq!(parent("/"), "/");
    }

    #[test]
    fn basenames_of_keys_and_prefixes() {
        assert_eq!(basename("top.txt"), "top.txt");
        assert_eq!(basename("dir/"), "dir");
        assert_eq!(basename("dir/sub.txt"), "sub.txt");
        assert_eq!(basename("dir/sub/"), "sub");
    }
}
