use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, warn};

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use clipindel::align::{Glsearch, Mafft};
use clipindel::config::CallerConfig;
use clipindel::input::{open_reference, AlignmentInput};
use clipindel::pipeline::{output_path, IndelCaller, RunStatus, JSON_SUFFIX, MSA_INPUTS_SUFFIX, TSV_SUFFIX};
use clipindel::utils::time::StepTimer;

/// Exit status when the chromosome yields no evidence.
const NO_EVIDENCE_EXIT: u8 = 2;

#[derive(Parser)]
#[command(name = "clipindel")]
#[command(
    about = "Indel caller driven by soft-clip and split-read evidence",
    long_about = "Calls insertions and deletions on one chromosome of a paired-end BAM/CRAM from clipped, indel-bearing and unmapped-mate reads, using MAFFT for read consensus and glsearch for breakpoint realignment."
)]
struct Cli {
    /// Log verbosity level
    #[arg(long, global = true, default_value = "info")]
    log_level: LogLevel,
    /// Write log output to a file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<String>,
    /// Append to log file instead of truncating
    #[arg(long, global = true)]
    append_log: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Call indels on one chromosome
    Call {
        /// Coordinate-sorted, indexed BAM or CRAM with paired-end reads.
        #[arg(long, required = true)]
        bam: PathBuf,
        /// Reference FASTA. Must be indexed (a corresponding .fai file must exist).
        #[arg(long, required = true)]
        reference: PathBuf,
        /// Chromosome to call, as named in the alignment header.
        #[arg(long, required = true)]
        chr: String,
        /// Substitution matrix passed to glsearch. Required here or in the config.
        #[arg(long)]
        glsearch_matrix: Option<PathBuf>,
        /// Prefix for output files. The call table is written to `<prefix>.<chr>.tsv`.
        #[arg(long, required = true)]
        out_prefix: String,
        /// Caller configuration JSON (thresholds and engines). Flags below override it.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Worker threads for consensus construction.
        #[arg(long)]
        threads: Option<usize>,
        /// Directory for aligner scratch files.
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
        /// MAFFT executable.
        #[arg(long)]
        mafft: Option<String>,
        /// glsearch executable.
        #[arg(long)]
        glsearch: Option<String>,
        /// Largest indel searched for.
        #[arg(long)]
        max_indel_size: Option<u64>,
        /// Minimum supporting reads for a call.
        #[arg(long)]
        alt_read_depth: Option<u32>,
        /// Also write `<prefix>.<chr>.calls.json`.
        #[arg(long)]
        json: bool,
        /// Also write the consensus inputs to `<prefix>.<chr>.msa_inputs.json`.
        #[arg(long)]
        keep_msa_input: bool,
        /// Force overwrite of existing output files.
        #[arg(short, long)]
        force: bool,
    },
    /// Print JSON Schema for the call document
    Schema {
        /// Write schema to file instead of stdout
        #[arg(long)]
        output: Option<String>,
    },
}

// Create the prefix directory and refuse to clobber outputs unless forced.
fn check_output_paths(prefix: &str, paths: &[PathBuf], force: bool) -> anyhow::Result<()> {
    let path = Path::new(prefix);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        info!("Creating output directory: {:?}", parent);
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }

    if !force {
        for p in paths {
            if p.exists() {
                bail!("Output file {} already exists. Use --force to overwrite.", p.display());
            }
        }
    }
    Ok(())
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let mut log_builder = env_logger::Builder::from_default_env();
    log_builder
        .filter_level(cli.log_level.to_level_filter())
        .format_module_path(false);
    if let Some(ref path) = cli.log_file {
        let file = if cli.append_log {
            std::fs::File::options().create(true).append(true).open(path)
        } else {
            std::fs::File::create(path)
        }
        .with_context(|| format!("Could not open log file '{}'", path))?;
        log_builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    log_builder.init();
    Ok(())
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Commands::Call {
            bam,
            reference,
            chr,
            glsearch_matrix,
            out_prefix,
            config,
            threads,
            scratch_dir,
            mafft,
            glsearch,
            max_indel_size,
            alt_read_depth,
            json,
            keep_msa_input,
            force,
        } => {
            let mut timer = StepTimer::new();
            timer.start("Initialization");

            let mut caller_config = match config {
                Some(path) => CallerConfig::load(path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => CallerConfig::default(),
            };
            let engines = &mut caller_config.engines;
            if let Some(path) = glsearch_matrix {
                engines.glsearch_matrix = Some(path.clone());
            }
            if let Some(n) = threads {
                engines.threads = *n;
            }
            if let Some(dir) = scratch_dir {
                engines.scratch_dir = dir.clone();
            }
            if let Some(cmd) = mafft {
                engines.mafft = cmd.clone();
            }
            if let Some(cmd) = glsearch {
                engines.glsearch = cmd.clone();
            }
            if let Some(size) = max_indel_size {
                caller_config.thresholds.max_indel_size = *size;
            }
            if let Some(depth) = alt_read_depth {
                caller_config.thresholds.alt_read_depth = *depth;
            }
            caller_config.validate()?;
            let Some(matrix) = caller_config.engines.glsearch_matrix.clone() else {
                bail!("No glsearch substitution matrix; pass --glsearch-matrix or set engines.glsearch_matrix");
            };

            let mut outputs = vec![output_path(out_prefix, chr, TSV_SUFFIX)];
            if *json {
                outputs.push(output_path(out_prefix, chr, JSON_SUFFIX));
            }
            if *keep_msa_input {
                outputs.push(output_path(out_prefix, chr, MSA_INPUTS_SUFFIX));
            }
            check_output_paths(out_prefix, &outputs, *force)?;

            let mut alignments = AlignmentInput::open(bam, Some(reference.as_path()))
                .with_context(|| format!("opening alignment file {}", bam.display()))?;
            if !alignments.reference_names().iter().any(|name| name == chr) {
                bail!("Chromosome '{}' is not in the header of {}", chr, bam.display());
            }
            let mut fasta = open_reference(reference)
                .with_context(|| format!("opening reference {}", reference.display()))?;

            let engines = &caller_config.engines;
            let aligner = Mafft::new(&engines.mafft, &engines.scratch_dir);
            let engine = Glsearch::new(&engines.glsearch, matrix, &engines.scratch_dir);
            info!(
                "Calling {} with {} consensus worker(s); scratch in {}",
                chr,
                engines.threads,
                engines.scratch_dir.display()
            );
            timer.end();

            timer.start("Calling");
            let status = IndelCaller::new(chr, out_prefix, &aligner, &engine)
                .with_config(&caller_config)
                .with_json(*json)
                .with_msa_inputs(*keep_msa_input)
                .run(&mut alignments, &mut fasta)?;

            match status {
                RunStatus::Completed(summary) => {
                    info!(
                        "{}: {} calls from {} breakpoints",
                        summary.chromosome,
                        summary.calls.len(),
                        summary.stages.breakpoints
                    );
                    timer.end();
                    Ok(ExitCode::SUCCESS)
                }
                RunStatus::NoEvidence => {
                    timer.end();
                    warn!("No evidence on {}; no output written", chr);
                    Ok(ExitCode::from(NO_EVIDENCE_EXIT))
                }
            }
        }

        Commands::Schema { output } => {
            let schema = clipindel::output::schema::schema_json_pretty()?;
            if let Some(path) = output {
                std::fs::write(path, &schema).with_context(|| format!("writing schema to {}", path))?;
                info!("Schema written to {}", path);
            } else {
                println!("{}", schema);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }
    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
