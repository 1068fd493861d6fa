// recstream-cli/src/main.rs

//! Command-line front end for recstream datasets.
//!
//! # Usage
//!
//! ```bash
//! # Show what a decoder produces
//! recstream signature --kind mnist-image
//!
//! # Print the first ten lines of a gzip text file
//! recstream cat --kind text --compression gzip --limit 10 data/train.txt.gz
//!
//! # Check that MNIST images and labels line up
//! recstream mnist --images train-images-idx3-ubyte --labels train-labels-idx1-ubyte
//!
//! # Write stdin to a compressed text file
//! cat lines.txt | recstream write-lines --destination out/lines.txt.gz --compression gzip
//! ```

use std::io::{self, BufRead, Write};

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recstream_core::dataset::{ElementStream, Pipeline};
use recstream_core::registry::{self, DecoderOptions};
use recstream_core::{Compression, ElementType, StreamRuntime};

/// Streaming record reader
#[derive(Parser, Debug)]
#[command(name = "recstream")]
#[command(about = "Read, decode and write record streams")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the output signature of a decoder kind
    Signature {
        #[command(flatten)]
        decoder: DecoderArgs,
    },
    /// Print decoded elements
    Cat {
        #[command(flatten)]
        decoder: DecoderArgs,

        /// Compression of the sources (none, gzip, zlib)
        #[arg(long)]
        compression: Option<Compression>,

        /// Stop after this many elements
        #[arg(long)]
        limit: Option<usize>,

        /// Source paths or URIs
        #[arg(required = true)]
        sources: Vec<String>,
    },
    /// Count elements until the sources are exhausted
    Count {
        #[command(flatten)]
        decoder: DecoderArgs,

        /// Compression of the sources (none, gzip, zlib)
        #[arg(long)]
        compression: Option<Compression>,

        /// Source paths or URIs
        #[arg(required = true)]
        sources: Vec<String>,
    },
    /// Zip MNIST images with labels and report the pair count
    Mnist {
        /// Image files
        #[arg(long, required = true, num_args = 1..)]
        images: Vec<String>,

        /// Label files
        #[arg(long, required = true, num_args = 1..)]
        labels: Vec<String>,

        /// Compression of both sides (none, gzip, zlib)
        #[arg(long)]
        compression: Option<Compression>,
    },
    /// Write lines from stdin to a text output
    WriteLines {
        /// Destination path or URI
        #[arg(long)]
        destination: String,

        /// Output compression (none, gzip, zlib)
        #[arg(long)]
        compression: Option<Compression>,
    },
}

#[derive(Args, Debug)]
struct DecoderArgs {
    /// Decoder kind (mnist-image, mnist-label, text, kv, raw)
    #[arg(long)]
    kind: String,

    /// Fixed record size in bytes (raw)
    #[arg(long)]
    record_size: Option<usize>,

    /// Record delimiter (text, raw)
    #[arg(long)]
    delimiter: Option<char>,

    /// Declared image rows (mnist-image)
    #[arg(long)]
    rows: Option<usize>,

    /// Declared image columns (mnist-image)
    #[arg(long)]
    cols: Option<usize>,

    /// Key element type (kv), e.g. int64 or "struct<NAME: string, VAL: int64>"
    #[arg(long)]
    key_type: Option<ElementType>,

    /// Value element type (kv)
    #[arg(long)]
    value_type: Option<ElementType>,
}

impl DecoderArgs {
    fn options(&self) -> Result<DecoderOptions, Box<dyn std::error::Error>> {
        let delimiter = match self.delimiter {
            Some(c) if c.is_ascii() => Some(c as u8),
            Some(c) => return Err(format!("delimiter '{c}' is not a single byte").into()),
            None => None,
        };

        Ok(DecoderOptions {
            record_size: self.record_size,
            delimiter,
            rows: self.rows,
            cols: self.cols,
            key_type: self.key_type.clone(),
            value_type: self.value_type.clone(),
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    registry::initialize();

    let runtime = match &cli.config {
        Some(path) => StreamRuntime::from_config_file(path)?,
        None => StreamRuntime::new()?,
    };

    match cli.command {
        Command::Signature { decoder } => {
            let signature = registry::create_decoder(&decoder.kind, &decoder.options()?)?
                .output_signature();
            println!("{signature}");
        }
        Command::Cat {
            decoder,
            compression,
            limit,
            sources,
        } => {
            let dataset =
                runtime.dataset(&decoder.kind, &decoder.options()?, &sources, compression)?;
            let mut iter = dataset.make_iterator();
            let stdout = io::stdout();
            let mut out = stdout.lock();

            let mut printed = 0usize;
            while limit.map_or(true, |n| printed < n) {
                match iter.next() {
                    Some(element) => writeln!(out, "{}", element?)?,
                    None => break,
                }
                printed += 1;
            }
            iter.close();
        }
        Command::Count {
            decoder,
            compression,
            sources,
        } => {
            let dataset =
                runtime.dataset(&decoder.kind, &decoder.options()?, &sources, compression)?;
            let mut count = 0u64;
            for element in dataset.make_iterator() {
                element?;
                count += 1;
            }
            println!("{count}");
        }
        Command::Mnist {
            images,
            labels,
            compression,
        } => {
            let mnist = runtime.mnist(&images, &labels, compression)?;
            let signatures: Vec<String> = mnist
                .output_signatures()
                .iter()
                .map(ToString::to_string)
                .collect();
            tracing::info!(signatures = %signatures.join(", "), "reading MNIST pairs");

            let mut pairs = 0u64;
            for pair in mnist.make_iterator() {
                pair?;
                pairs += 1;
            }
            println!("{pairs}");
        }
        Command::WriteLines {
            destination,
            compression,
        } => {
            let mut sink = runtime.text_output(&destination, compression)?;
            for (index, line) in io::stdin().lock().lines().enumerate() {
                sink.set_item(index as u64, line?)?;
            }
            let written = sink.finish()?;
            tracing::info!(destination = %destination, lines = written, "done");
        }
    }

    Ok(())
}
