//! Minimal CLI parsing.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    /// Run a single scan cycle and exit
    pub once: bool,
    /// Dotenv file to load instead of `./.env`
    pub env_file: Option<PathBuf>,
}

impl CliOptions {
    pub fn from_args() -> Self {
        Self::parse(env::args().skip(1))
    }

    pub fn parse<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = CliOptions::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--once" => options.once = true,
                "--env-file" => {
                    if let Some(value) = args.next() {
                        options.env_file = Some(PathBuf::from(value));
                    }
                }
                _ if arg.starts_with("--env-file=") => {
                    if let Some(value) = arg.split_once('=').map(|(_, v)| v) {
                        options.env_file = Some(PathBuf::from(value));
                    }
                }
                _ => {}
            }
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliOptions {
        CliOptions::parse(args.iter().map(|a| a.to_string()))
    }

    #[test]
    fn test_parse() {
        assert_eq!(parse(&[]), CliOptions::default());
        assert!(parse(&["--once"]).once);
        assert_eq!(
            parse(&["--env-file", "prod.env"]).env_file,
            Some(PathBuf::from("prod.env"))
        );
        assert_eq!(
            parse(&["--env-file=prod.env", "--once"]),
            CliOptions {
                once: true,
                env_file: Some(PathBuf::from("prod.env")),
            }
        );
    }
}
