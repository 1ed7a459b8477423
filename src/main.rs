use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use thiserror::Error;

use credcheck_lib::config::{self, ConfigError, OcrSection, ProgramConfig};
use credcheck_lib::models::DocumentKind;
use credcheck_lib::pipeline::classify::{ClassificationScores, DocumentClassifier};
use credcheck_lib::pipeline::evaluation::{Applicant, ApplicantEvaluator};
use credcheck_lib::pipeline::extraction::pdfium::PdfiumRenderer;
use credcheck_lib::pipeline::extraction::{
    extract_ects_with_timeout, CreditExtractor, Document, ExtractionError, OcrCache, OcrEngine,
    PageRecognizer, RecognitionSettings, SweepPlan,
};
use credcheck_lib::pipeline::grading::{
    convert_to_german, normalize_country_name, verify_grade, GradeVerification,
    DEFAULT_GRADE_TOLERANCE,
};
use credcheck_lib::pipeline::supervisor::{DocumentSupervisor, ExtractionJob};

#[derive(Parser, Debug)]
#[command(name = "credcheck", version, about = "Evaluate scanned academic credentials")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ProgramArgs {
    /// Program configuration (TOML)
    #[arg(short, long)]
    config: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Label documents by kind and pick the strongest transcript
    Classify {
        #[command(flatten)]
        program: ProgramArgs,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Sum credits per category from one transcript
    Extract {
        #[command(flatten)]
        program: ProgramArgs,
        file: PathBuf,
    },
    /// Extract credits from many transcripts concurrently
    Batch {
        #[command(flatten)]
        program: ProgramArgs,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Convert a foreign grade and compare it with a claimed German grade
    Grade {
        #[arg(long)]
        country: String,
        #[arg(long)]
        foreign: f64,
        #[arg(long)]
        claimed: Option<f64>,
        #[arg(long, default_value_t = DEFAULT_GRADE_TOLERANCE)]
        tolerance: f64,
    },
    /// Evaluate all documents of one applicant
    Evaluate {
        #[command(flatten)]
        program: ProgramArgs,
        /// Country of the bachelor degree
        #[arg(long)]
        country: Option<String>,
        /// Claimed German grade
        #[arg(long)]
        claimed: Option<f64>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    credcheck_lib::init_tracing();
    let cli = Cli::parse();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "credcheck failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Classify { program, files } => {
            let config = ProgramConfig::load(&program.config)?;
            let classifier = DocumentClassifier::new(build_recognizer(&config)?);
            let report = classifier.classify_many(&open_documents(&files), config.track);
            print_json(&ClassifyOutput {
                by_type: report
                    .by_type
                    .iter()
                    .map(|(kind, docs)| (*kind, docs.iter().map(|d| d.name().to_string()).collect()))
                    .collect(),
                best_transcript: report
                    .best_transcript
                    .map(|(doc, scores)| (doc.name().to_string(), scores)),
            })
        }
        Command::Extract { program, file } => {
            let config = ProgramConfig::load(&program.config)?;
            let extractor = Arc::new(build_extractor(&config)?);
            let document = open_document(&file);
            let extraction = block_on(extract_ects_with_timeout(
                extractor,
                document,
                Arc::new(config.module_mapping()),
                Arc::new(config.categories()),
                config.ocr.document_timeout(),
            ))?;
            print_json(&extraction)
        }
        Command::Batch { program, files } => {
            let config = ProgramConfig::load(&program.config)?;
            let supervisor = DocumentSupervisor::with_limits(
                Arc::new(build_extractor(&config)?),
                config.ocr.max_concurrent_documents,
                config.ocr.document_timeout(),
            );
            let mapping = Arc::new(config.module_mapping());
            let categories = Arc::new(config.categories());
            let jobs = open_documents(&files)
                .into_iter()
                .map(|document| ExtractionJob {
                    document,
                    mapping: Arc::clone(&mapping),
                    categories: Arc::clone(&categories),
                })
                .collect();
            let outcomes = block_on(supervisor.run_all(jobs))?;
            print_json(&outcomes)
        }
        Command::Grade {
            country,
            foreign,
            claimed,
            tolerance,
        } => print_json(&GradeOutput {
            country: normalize_country_name(&country),
            converted: convert_to_german(&country, foreign),
            verification: verify_grade(&country, foreign, claimed, tolerance),
        }),
        Command::Evaluate {
            program,
            country,
            claimed,
            files,
        } => {
            let config = ProgramConfig::load(&program.config)?;
            let evaluator = ApplicantEvaluator::new(Arc::new(build_extractor(&config)?), &config);
            let applicant = Applicant {
                documents: open_documents(&files),
                bachelor_country: country,
                claimed_grade: claimed,
            };
            let report = block_on(evaluator.evaluate(applicant))?;
            print_json(&report)
        }
    }
}

#[derive(Serialize)]
struct ClassifyOutput {
    by_type: std::collections::BTreeMap<DocumentKind, Vec<String>>,
    best_transcript: Option<(String, ClassificationScores)>,
}

#[derive(Serialize)]
struct GradeOutput {
    country: Option<&'static str>,
    converted: Option<f64>,
    verification: GradeVerification,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Drive `future` to completion. Timed-out extractions may still occupy the
/// blocking pool, so the runtime is not waited on afterwards.
fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, CliError> {
    let runtime = tokio::runtime::Runtime::new().map_err(CliError::Runtime)?;
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    Ok(output)
}

// ── Engine wiring ───────────────────────────────────────

fn build_recognizer(config: &ProgramConfig) -> Result<PageRecognizer, CliError> {
    let engine = ocr_engine(&config.ocr)?;
    let renderer = Arc::new(PdfiumRenderer::new()?);
    let settings = RecognitionSettings {
        languages: config.ocr.languages.clone(),
        threads: config.ocr.threads.max(1),
        page_timeout: config.ocr.page_timeout(),
    };
    tracing::info!(
        app = config::APP_NAME,
        version = config::APP_VERSION,
        languages = %settings.languages,
        threads = settings.threads,
        "OCR pipeline ready"
    );
    Ok(PageRecognizer::new(engine, renderer, Arc::new(OcrCache::new())).with_settings(settings))
}

fn build_extractor(config: &ProgramConfig) -> Result<CreditExtractor, CliError> {
    let sweep = SweepPlan {
        dpis: config.ocr.dpis.clone(),
        modes: config.ocr.modes.clone(),
    };
    Ok(CreditExtractor::new(build_recognizer(config)?).with_sweep(sweep))
}

#[cfg(feature = "ocr")]
fn ocr_engine(ocr: &OcrSection) -> Result<Arc<dyn OcrEngine>, ExtractionError> {
    use credcheck_lib::pipeline::extraction::BundledTesseract;
    Ok(Arc::new(BundledTesseract::new(&ocr.tessdata_dir())?))
}

#[cfg(not(feature = "ocr"))]
fn ocr_engine(_ocr: &OcrSection) -> Result<Arc<dyn OcrEngine>, ExtractionError> {
    Err(ExtractionError::OcrUnavailable)
}

/// Unreadable files become empty documents and evaluate to empty results.
fn open_document(path: &Path) -> Document {
    match Document::open(path) {
        Ok(document) => document,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not read document");
            Document::missing(path.display().to_string())
        }
    }
}

fn open_documents(paths: &[PathBuf]) -> Vec<Document> {
    paths.iter().map(|p| open_document(p)).collect()
}
