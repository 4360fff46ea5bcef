use clap::Parser;
use quarry_context::text::{Chunker, ChunkerConfig};
use std::fs;
use std::io::{self, Read};

/// A CLI tool to chunk note files into JSON output using quarry-context.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input text file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Document path recorded in each chunk's metadata.
    #[arg(short, long, default_value = "unknown_path")]
    path: String,

    /// Maximum chunk size in bytes.
    #[arg(short = 's', long, default_value_t = 1000)]
    chunk_size: usize,

    /// Overlap between consecutive chunks in bytes.
    #[arg(short = 'o', long, default_value_t = 200)]
    chunk_overlap: usize,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let file_content = if let Some(input_path) = args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let config = ChunkerConfig::new(args.chunk_size, args.chunk_overlap);
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    let chunker = Chunker::new(config);
    let chunks = chunker.chunk(&args.path, &file_content);

    let json_output = serde_json::to_string_pretty(&chunks)?;
    println!("{json_output}");

    Ok(())
}
