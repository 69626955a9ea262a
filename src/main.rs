use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use minicc::{generate_assembly, tokenizer};

#[derive(Debug, clap::Parser)]
#[clap(author, version, about)]
struct Args {
  /// Program text to compile
  source: String,

  /// Write assembly to this file instead of stdout
  #[clap(short, long)]
  output: Option<PathBuf>,

  /// Print the token stream to stderr before compiling
  #[clap(long)]
  dump_tokens: bool,
}

fn write_output(path: Option<&PathBuf>, asm: &str) -> io::Result<()> {
  match path {
    Some(path) => fs::write(path, asm),
    None => {
      let mut stdout = io::stdout().lock();
      stdout.write_all(asm.as_bytes())?;
      stdout.flush()
    }
  }
}

fn main() {
  let args = match Args::try_parse() {
    Ok(args) => args,
    Err(err) if err.use_stderr() => {
      let _ = err.print();
      process::exit(1);
    }
    Err(err) => err.exit(),
  };

  if args.dump_tokens {
    match tokenizer::tokenize(&args.source) {
      Ok(tokens) => eprint!("{}", tokenizer::dump_tokens(&tokens, &args.source)),
      Err(err) => {
        eprintln!("{err}");
        process::exit(1);
      }
    }
  }

  match generate_assembly(&args.source) {
    Ok(asm) => {
      if let Err(err) = write_output(args.output.as_ref(), &asm) {
        eprintln!("failed to write assembly: {err}");
        process::exit(1);
      }
    }
    Err(err) => {
      eprintln!("{err}");
      process::exit(1);
    }
  }
}
