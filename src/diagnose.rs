//! Requester entry point: query a vision model for every extracted case.
//!
//! The run visits every (temperature, try, case) slot in that nesting order.
//! A slot whose result file already exists is skipped, so an interrupted run
//! resumes where it stopped; the result file is the only progress marker.
//!
//! ## Failure handling
//!
//! | Situation | Effect |
//! |-----------|--------|
//! | history or legend text missing | slot skipped, logged |
//! | history or legend text unreadable | slot failed, run continues |
//! | case image cannot be encoded | slot failed, run continues |
//! | every attempt refused or errored | slot failed, line appended to `process_log.txt`, no result file |
//! | provider quota exceeded | run aborts with [`CaseDxError::QuotaExceeded`] after `on_run_complete` |

use crate::config::DiagnosisConfig;
use crate::error::{CaseDxError, CaseError};
use crate::layout::{CaseId, CaseLayout, ResultLayout};
use crate::output::{CaseReport, CaseStatus, DiagnosisSummary};
use crate::pipeline::encode::{load_case_images, EncodedImage, UploadEncoder};
use crate::pipeline::llm::{query_with_retries, QueryError, QueryOutcome, RetryPolicy, VisionClient};
use crate::prompts::differential_diagnosis_prompt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

/// Run the requester over every configured slot.
///
/// # Returns
/// `Ok(summary)` even if some slots failed (check `summary.failed`).
///
/// # Errors
/// - [`CaseDxError::QuotaExceeded`] as soon as the provider reports it
/// - [`CaseDxError::OutputWriteFailed`] when a run folder or result cannot be written
pub async fn run_diagnosis<C: VisionClient>(
    client: &C,
    config: &DiagnosisConfig,
) -> Result<DiagnosisSummary, CaseDxError> {
    let start = Instant::now();
    let provider = config.provider;
    let classifier = provider.classifier();
    let encoder = UploadEncoder::default();
    let policy = RetryPolicy {
        max_attempts: config.max_attempts,
        backoff_ms: config.retry_backoff_ms,
    };
    let cases = CaseLayout::new(&config.cases_dir, &config.cases_dir);
    let results = ResultLayout::new(&config.results_root, config.prefix());
    let cb = config.progress_callback.as_ref();

    let mut summary = DiagnosisSummary {
        provider: provider.to_string(),
        model: config
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string()),
        ..Default::default()
    };

    let total = config.cases.len() * config.temperatures.len() * config.tries as usize;
    info!(
        "Querying {} ({}) for {} slots into {}",
        summary.provider,
        summary.model,
        total,
        results.provider_dir().display()
    );
    if let Some(cb) = cb {
        cb.on_run_start(total);
    }

    for &temperature in &config.temperatures {
        for try_number in 1..=config.tries {
            let run_dir = results.run_dir(temperature, try_number);
            fs::create_dir_all(&run_dir).map_err(|source| CaseDxError::OutputWriteFailed {
                path: run_dir.clone(),
                source,
            })?;
            let label = format!("temperature {temperature}, try {try_number}");

            for case in config.cases.iter() {
                let mut report = CaseReport::new(case, temperature, try_number, CaseStatus::Saved);
                let result_path = results.result_file(temperature, try_number, case);

                if result_path.exists() {
                    info!("{} ({}): result exists, skipping", case, label);
                    if let Some(cb) = cb {
                        cb.on_case_skipped(case, "result exists");
                    }
                    report.status = CaseStatus::SkippedExisting;
                    report.result_file = Some(result_path);
                    summary.record(report);
                    continue;
                }

                let history_path = cases.history_file(case);
                let legends_path = cases.legends_file(case);
                if let Some(missing) = [&history_path, &legends_path]
                    .into_iter()
                    .find(|p| !p.is_file())
                {
                    warn!("{}: necessary text files are missing ({})", case, missing.display());
                    if let Some(cb) = cb {
                        cb.on_case_skipped(case, "text files missing");
                    }
                    report.status = CaseStatus::SkippedMissing;
                    report.error = Some(CaseError::MissingInput {
                        case: case.0,
                        path: missing.clone(),
                    });
                    summary.record(report);
                    continue;
                }

                if let Some(cb) = cb {
                    cb.on_case_start(case, &label);
                }

                let texts = read_text(&history_path)
                    .and_then(|history| read_text(&legends_path).map(|legends| (history, legends)));
                let (history, legends) = match texts {
                    Ok(texts) => texts,
                    Err((path, e)) => {
                        error!("{} ({}): cannot read {}: {}", case, label, path.display(), e);
                        if let Some(cb) = cb {
                            cb.on_case_error(case, &e.to_string());
                        }
                        report.status = CaseStatus::Failed;
                        report.error = Some(CaseError::ReadFailed {
                            case: case.0,
                            path,
                            detail: e.to_string(),
                        });
                        summary.record(report);
                        continue;
                    }
                };
                let prompt = differential_diagnosis_prompt(provider, &history, &legends);

                let images = match load_images(cases.case_dir(case), config.min_image_side, encoder).await {
                    Ok(images) => images,
                    Err(e) => {
                        error!("{} ({}): {}", case, label, e);
                        if let Some(cb) = cb {
                            cb.on_case_error(case, &e.to_string());
                        }
                        report.status = CaseStatus::Failed;
                        report.error = Some(CaseError::EncodeFailed {
                            case: case.0,
                            detail: e.to_string(),
                        });
                        summary.record(report);
                        continue;
                    }
                };

                let slot_label = format!("{case} ({label})");
                let outcome = query_with_retries(
                    client,
                    classifier.as_ref(),
                    &encoder,
                    &slot_label,
                    &prompt,
                    images,
                    temperature,
                    &policy,
                )
                .await;

                match outcome {
                    Ok(QueryOutcome::Answered {
                        completion,
                        attempts,
                    }) => {
                        write_result(&run_dir, &result_path, &completion.text)?;
                        info!("{}: result has been saved", slot_label);
                        if let Some(cb) = cb {
                            cb.on_case_complete(case, completion.text.len());
                        }
                        report.attempts = attempts;
                        report.input_tokens = completion.input_tokens;
                        report.output_tokens = completion.output_tokens;
                        report.result_file = Some(result_path);
                    }
                    Ok(QueryOutcome::Exhausted {
                        attempts,
                        last_reason,
                    }) => {
                        let line = format!(
                            "{slot_label}: unable to find result after {attempts} attempts ({last_reason})"
                        );
                        error!("{}", line);
                        append_failure(&results.failure_log(), &line)?;
                        if let Some(cb) = cb {
                            cb.on_case_error(case, &last_reason);
                        }
                        report.status = CaseStatus::Failed;
                        report.attempts = attempts;
                        report.error = Some(CaseError::ProviderExhausted {
                            case: case.0,
                            attempts,
                            detail: last_reason,
                        });
                    }
                    Err(QueryError::Fatal(detail)) => {
                        error!("{}: quota exceeded, stopping the run", slot_label);
                        if let Some(cb) = cb {
                            cb.on_case_error(case, &detail);
                            cb.on_run_complete(total, summary.saved);
                        }
                        return Err(CaseDxError::QuotaExceeded {
                            provider: summary.provider,
                            detail,
                        });
                    }
                    Err(QueryError::Encode(e)) => {
                        error!("{}: {}", slot_label, e);
                        if let Some(cb) = cb {
                            cb.on_case_error(case, &e.to_string());
                        }
                        report.status = CaseStatus::Failed;
                        report.error = Some(CaseError::EncodeFailed {
                            case: case.0,
                            detail: e.to_string(),
                        });
                    }
                }
                summary.record(report);
            }
        }
    }

    summary.total_duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Run complete: {} saved, {} already present, {} missing input, {} failed, {} in / {} out tokens",
        summary.saved,
        summary.skipped_existing,
        summary.skipped_missing,
        summary.failed,
        summary.total_input_tokens,
        summary.total_output_tokens
    );
    if let Some(cb) = cb {
        cb.on_run_complete(total, summary.saved);
    }

    Ok(summary)
}

/// Decode and encode the case images off the async workers.
async fn load_images(
    dir: PathBuf,
    min_side: u32,
    encoder: UploadEncoder,
) -> Result<Vec<EncodedImage>, CaseDxError> {
    tokio::task::spawn_blocking(move || load_case_images(&dir, min_side, &encoder))
        .await
        .map_err(|e| CaseDxError::Internal(format!("image task panicked: {}", e)))?
}

fn read_text(path: &Path) -> Result<String, (PathBuf, std::io::Error)> {
    fs::read_to_string(path).map_err(|e| (path.to_path_buf(), e))
}

/// Write `text` to `path` via a temp file in `dir`; never replaces an existing file.
fn write_result(dir: &Path, path: &Path, text: &str) -> Result<(), CaseDxError> {
    let write_err = |source| CaseDxError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(text.as_bytes()).map_err(write_err)?;
    tmp.persist_noclobber(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

fn append_failure(log_path: &Path, line: &str) -> Result<(), CaseDxError> {
    let append_err = |source| CaseDxError::OutputWriteFailed {
        path: log_path.to_path_buf(),
        source,
    };
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).map_err(append_err)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(append_err)?;
    writeln!(file, "{line}").map_err(append_err)
}
