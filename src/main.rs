//! readpipe - Main Entry Point
//!
//! Streams JSON-lines read records through duplex tagging and modified-base
//! calling, writing the processed records back out as JSON lines.

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use readpipe::{
    config::PipelineConfig,
    logging,
    pipeline::{nodes::ChannelSink, Message, PipelineBuilder},
    ReadRecord,
};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tempfile::NamedTempFile;

#[derive(Parser, Debug)]
#[command(version, about = "Duplex tagging and modified-base calling for basecalled reads")]
struct Args {
    /// Pipeline config file (.toml or .json); defaults are used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input reads as JSON lines; stdin when absent
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output reads as JSON lines; stdout when absent
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print pipeline stats as JSON to stderr when done
    #[arg(long)]
    stats: bool,

    /// Print the effective config as TOML and exit
    #[arg(long)]
    dump_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if args.dump_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let _log_guard = logging::init(&config.logging)?;
    tracing::info!("Starting readpipe");

    run(&args, config)
}

fn open_input(path: Option<&PathBuf>) -> Result<Box<dyn BufRead>> {
    Ok(match path {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    })
}

/// Where processed reads go. A file target is written to a temp file in the
/// same directory and only renamed over `path` once the run succeeds.
enum Output {
    Stdout,
    File { staged: NamedTempFile, path: PathBuf },
}

impl Output {
    fn open(path: Option<&PathBuf>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Output::Stdout);
        };
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let staged = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create a temp file next to {}", path.display()))?;
        Ok(Output::File {
            staged,
            path: path.clone(),
        })
    }

    fn writer(&self) -> Result<Box<dyn Write + Send>> {
        Ok(match self {
            Output::Stdout => Box::new(BufWriter::new(io::stdout())),
            Output::File { staged, .. } => Box::new(BufWriter::new(staged.as_file().try_clone()?)),
        })
    }

    /// Move the staged file into place.
    fn commit(self) -> Result<()> {
        if let Output::File { staged, path } = self {
            staged
                .persist(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        Ok(())
    }
}

/// Drain the output channel until every sender is gone.
fn write_records(rx: Receiver<Message>, mut out: Box<dyn Write + Send>) -> Result<usize> {
    let mut written = 0;
    for message in rx {
        match message {
            Message::Read(read) => {
                serde_json::to_writer(&mut out, &ReadRecord::from_read(&read))?;
                out.write_all(b"\n")?;
                written += 1;
            }
            Message::Control(control) => tracing::debug!("Output: {:?}", control),
        }
    }
    out.flush()?;
    Ok(written)
}

fn run(args: &Args, config: PipelineConfig) -> Result<()> {
    let input = open_input(args.input.as_ref())?;
    let output = Output::open(args.output.as_ref())?;
    let out = output.writer()?;

    let (sink, rx) = ChannelSink::with_capacity(config.pipeline.output_capacity);
    let (pipeline, _node_ids) = PipelineBuilder::new(config)
        .build_with_prior_runners(Arc::new(sink))
        .context("Failed to build pipeline")?;

    let writer = thread::Builder::new()
        .name("readpipe-writer".into())
        .spawn(move || write_records(rx, out))?;

    let mut pushed = 0usize;
    let mut input_error = None;
    for (line_no, line) in input.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                input_error = Some(anyhow::Error::new(e).context("Failed to read input"));
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let record: ReadRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                input_error = Some(
                    anyhow::Error::new(e).context(format!("Invalid read record on line {}", line_no + 1)),
                );
                break;
            }
        };
        if let Err(e) = pipeline.push_message(record.into_read().into()) {
            // The node that failed reports the cause from terminate().
            tracing::warn!("Pipeline stopped accepting reads: {}", e);
            break;
        }
        pushed += 1;
    }

    tracing::info!("Pushed {} reads, waiting for the pipeline to drain", pushed);
    let terminated = pipeline.terminate();
    let stats = pipeline.sample_stats();
    // Dropping the pipeline drops the last channel sender.
    drop(pipeline);

    let written = match writer.join() {
        Ok(result) => result.context("Failed to write output")?,
        Err(_) => bail!("writer thread panicked"),
    };

    if args.stats {
        eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    }

    if let Err(e) = terminated {
        if e.is_input_violation() {
            return Err(anyhow::Error::new(e).context(format!(
                "Input rejected after {} reads; no output written",
                pushed
            )));
        }
        return Err(anyhow::Error::new(e).context("Pipeline failed"));
    }
    if let Some(err) = input_error {
        return Err(err);
    }

    // Any early return above drops `output`, which deletes the staged file.
    output.commit()?;
    tracing::info!("Done: {} reads in, {} reads out", pushed, written);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_output_file_appears_only_on_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reads.jsonl");

        let output = Output::open(Some(&path)).unwrap();
        let mut out = output.writer().unwrap();
        out.write_all(b"{}\n").unwrap();
        out.flush().unwrap();
        drop(out);
        assert!(!path.exists());

        output.commit().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_failed_run_leaves_existing_output_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reads.jsonl");
        std::fs::write(&path, "previous\n").unwrap();

        let output = Output::open(Some(&path)).unwrap();
        let mut out = output.writer().unwrap();
        out.write_all(b"partial\n").unwrap();
        out.flush().unwrap();
        drop(out);
        // A failed run returns before commit.
        drop(output);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "previous\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
