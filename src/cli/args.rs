#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::parser::CliError;

/// # Errors
/// Returns `CliError::UnknownFlag` if a flag outside `allowed_flags` is found.
pub fn ensure_no_unknown_flags(args: &[String], allowed_flags: &[&str]) -> Result<(), CliError> {
    let invalid = args
        .iter()
        .skip(1)
        .find(|arg| {
            arg.starts_with("--")
                && !matches!(arg.as_str(), "--help" | "-h")
                && !allowed_flags.iter().any(|allowed| allowed == &arg.as_str())
        })
        .cloned();

    invalid.map_or(Ok(()), |flag| Err(CliError::UnknownFlag { flag }))
}
