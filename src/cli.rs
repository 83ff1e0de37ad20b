use std::path::PathBuf;

use clap::Parser;

/// Encrypted block-structured object store.
///
/// Files are packed into fixed-size encrypted blocks on a local or remote
/// blob store; an encrypted index maps filenames to byte ranges across the
/// blocks.
#[derive(Debug, Parser)]
#[clap(name = "blockvault", version)]
pub struct Cli {
    /// Use this string as the pre-hash key material.
    #[clap(long)]
    pub key: Option<String>,

    /// Read a file's contents as the pre-hash key material.
    #[clap(long)]
    pub key_file: Option<PathBuf>,

    /// Config file path (default: config.json in the working directory,
    /// when present).
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Read the file at this path and add it under its path string.
    #[clap(long)]
    pub add_file: Option<PathBuf>,

    /// Retrieve a file by name and write it to --output or stdout.
    #[clap(long, conflicts_with_all = ["add_file", "delete_file"])]
    pub get_file: Option<String>,

    /// Delete a file by name, zeroing out the space it occupied.
    #[clap(long)]
    pub delete_file: Option<String>,

    /// Output path for --get-file.
    #[clap(short, long, requires = "get_file")]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let cli = Cli::parse_from([
            "blockvault",
            "--key",
            "hunter2",
            "--add-file",
            "notes.txt",
        ]);
        assert_eq!(cli.key.as_deref(), Some("hunter2"));
        assert_eq!(cli.add_file.as_deref(), Some(std::path::Path::new("notes.txt")));
        assert!(cli.get_file.is_none());
    }

    #[test]
    fn get_conflicts_with_mutations() {
        let result = Cli::try_parse_from([
            "blockvault",
            "--key",
            "k",
            "--get-file",
            "a",
            "--add-file",
            "b",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn output_requires_get() {
        let result = Cli::try_parse_from(["blockvault", "--key", "k", "-o", "out.bin"]);
        assert!(result.is_err());
    }
}
