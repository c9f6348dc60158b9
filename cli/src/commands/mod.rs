//! Subcommands of the `filestore` tool.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use filestore::{ConcatError, DriverRegistry, FileError};

mod concat;
mod copy;
mod drivers;
mod lines;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    File(#[from] FileError),

    #[error("chunk merge failed")]
    Concat(#[from] ConcatError),

    #[error("unable to write the output")]
    Output(#[from] std::io::Error),

    #[error("unable to serialize the driver list")]
    Json(#[from] serde_json::Error),
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the available drivers
    Drivers {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show what the drivers know about a file
    Info { uri: String },
    /// Print the fields of the first line
    Header {
        uri: String,
        /// Field separator
        #[arg(short, long, default_value_t = '\t')]
        separator: char,
    },
    /// Count the lines of a file, buffer by buffer
    CountLines {
        uri: String,
        /// Buffer size in bytes, the driver preference if absent
        #[arg(short, long)]
        buffer_size: Option<usize>,
    },
    /// Merge chunk files into one file
    Concat {
        /// Output URI
        #[arg(short, long)]
        output: String,
        /// Header line fields, in order
        #[arg(long = "header", value_name = "FIELD")]
        header: Vec<String>,
        /// Leave the chunks in place
        #[arg(long)]
        keep_chunks: bool,
        #[arg(required = true)]
        chunks: Vec<String>,
    },
    /// Copy a file from any driver to a local path
    CopyToLocal { uri: String, path: PathBuf },
    /// Copy a local file to any driver
    CopyFromLocal { path: PathBuf, uri: String },
}

impl Command {
    /// # Errors
    /// Whatever the command failed on.
    pub fn run(self, registry: &Arc<DriverRegistry>) -> Result<(), CommandError> {
        let mut out = std::io::stdout().lock();
        match self {
            Self::Drivers { json } => drivers::list(registry, json, &mut out),
            Self::Info { uri } => drivers::info(registry, &uri, &mut out),
            Self::Header { uri, separator } => {
                lines::header(registry, &uri, separator, &mut out)
            }
            Self::CountLines { uri, buffer_size } => {
                let count = lines::count_lines(registry, &uri, buffer_size)?;
                lines::print_count(count, &mut out)
            }
            Self::Concat {
                output,
                header,
                keep_chunks,
                chunks,
            } => concat::run(registry, &output, header, !keep_chunks, &chunks),
            Self::CopyToLocal { uri, path } => copy::to_local(registry, &uri, &path),
            Self::CopyFromLocal { path, uri } => copy::from_local(registry, &path, &uri),
        }
    }
}
