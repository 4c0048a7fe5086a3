//! Integration tests for the diagnosis requester.
//!
//! A scripted [`VisionClient`] stands in for the provider, so these run
//! offline against temporary case folders.

use casedx::pipeline::llm::{ClientError, Completion};
use casedx::pipeline::encode::EncodedImage;
use casedx::{
    run_diagnosis, CaseDxError, CaseError, CaseId, CaseLayout, CaseStatus, DiagnosisConfig,
    Provider, ResultLayout, RunProgressCallback, VisionClient,
};
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Route library logs to the test harness; `RUST_LOG=casedx=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Events {
    errors: AtomicUsize,
    completed: AtomicUsize,
    run_complete: AtomicUsize,
}

impl RunProgressCallback for Events {
    fn on_case_complete(&self, _case: CaseId, _bytes: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_case_error(&self, _case: CaseId, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
    fn on_run_complete(&self, _total: usize, _succeeded: usize) {
        self.run_complete.fetch_add(1, Ordering::SeqCst);
    }
}

/// Replays canned replies; records prompt and image count per call.
struct Scripted {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<(String, usize, f32)>>,
}

impl Scripted {
    fn new(replies: Vec<Result<&str, &str>>) -> Self {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A client that answers every call.
    fn always(answer: &str) -> Self {
        Self::new(vec![Ok(answer); 64])
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl VisionClient for Scripted {
    async fn complete(
        &self,
        prompt: &str,
        images: &[EncodedImage],
        temperature: f32,
    ) -> Result<Completion, ClientError> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), images.len(), temperature));
        let next = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("script exhausted".into()));
        next.map(|text| Completion {
            text,
            input_tokens: 100,
            output_tokens: 50,
        })
        .map_err(ClientError)
    }
}

/// Write an extracted case folder: both text files and one large + one tiny image.
fn seed_case(cases_dir: &Path, case: u32) {
    let layout = CaseLayout::new(cases_dir, cases_dir);
    let id = CaseId(case);
    fs::create_dir_all(layout.case_dir(id)).unwrap();
    fs::write(
        layout.history_file(id),
        format!("History: patient {case} presented with fever.\n\n"),
    )
    .unwrap();
    fs::write(layout.legends_file(id), "Figure 1 Chest CT (Page 2)\n").unwrap();

    DynamicImage::ImageRgb8(RgbImage::from_pixel(320, 240, Rgb([120, 80, 40])))
        .save(layout.page_image(id, 1))
        .unwrap();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 100, Rgb([1, 2, 3])))
        .save(layout.embedded_image(id, 1, 0, "png"))
        .unwrap();
}

fn config(dir: &TempDir, provider: Provider, start: u32, end: u32) -> DiagnosisConfig {
    DiagnosisConfig::builder(provider)
        .cases_dir(dir.path().join("output"))
        .results_root(dir.path())
        .cases(start, end)
        .temperatures(vec![0.5])
        .tries(1)
        .build()
        .unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn saves_accepted_answer_in_run_folder() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    seed_case(&dir.path().join("output"), 1);
    let client = Scripted::always("1. Tuberculosis (7/10): cavitary lesion ...");

    let summary = run_diagnosis(&client, &config(&dir, Provider::OpenAi, 1, 1))
        .await
        .unwrap();

    assert_eq!(summary.saved, 1);
    let result = dir
        .path()
        .join("gpt4v_result/gpt4v_result_temp_0_5_try1/case-1.txt");
    assert_eq!(
        fs::read_to_string(&result).unwrap(),
        "1. Tuberculosis (7/10): cavitary lesion ..."
    );

    let calls = client.calls.lock().unwrap();
    let (prompt, images, temperature) = &calls[0];
    assert!(prompt.contains("History: patient 1 presented with fever."));
    assert!(prompt.contains("Figure 1 Chest CT (Page 2)"));
    // the 100×100 image is below the upload threshold
    assert_eq!(*images, 1);
    assert_eq!(*temperature, 0.5);
}

#[tokio::test]
async fn missing_text_files_make_no_calls() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cases_dir = dir.path().join("output");
    seed_case(&cases_dir, 1);
    fs::remove_file(CaseLayout::new(&cases_dir, &cases_dir).legends_file(CaseId(1))).unwrap();
    let client = Scripted::always("unused answer text");

    let summary = run_diagnosis(&client, &config(&dir, Provider::OpenAi, 1, 2))
        .await
        .unwrap();

    assert_eq!(client.call_count(), 0);
    assert_eq!(summary.skipped_missing, 2);
    assert!(summary
        .reports
        .iter()
        .all(|r| r.status == CaseStatus::SkippedMissing));
    assert!(!dir
        .path()
        .join("gpt4v_result/gpt4v_result_temp_0_5_try1/case-1.txt")
        .exists());
}

#[tokio::test]
async fn existing_results_are_never_requeried() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    for case in 1..=3 {
        seed_case(&dir.path().join("output"), case);
    }
    let results = ResultLayout::new(dir.path(), "gemini");
    fs::create_dir_all(results.run_dir(0.5, 1)).unwrap();
    for case in 1..=3 {
        fs::write(results.result_file(0.5, 1, CaseId(case)), "earlier answer").unwrap();
    }
    let client = Scripted::always("a fresh and different answer");

    let summary = run_diagnosis(&client, &config(&dir, Provider::Gemini, 1, 3))
        .await
        .unwrap();

    assert_eq!(client.call_count(), 0);
    assert_eq!(summary.skipped_existing, 3);
    assert_eq!(
        fs::read_to_string(results.result_file(0.5, 1, CaseId(2))).unwrap(),
        "earlier answer"
    );
}

#[tokio::test]
async fn quota_exceeded_aborts_run() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    for case in 1..=3 {
        seed_case(&dir.path().join("output"), case);
    }
    let client = Scripted::new(vec![
        Ok("1. Sarcoidosis ..."),
        Err("You exceeded your current quota, please check your plan"),
        Ok("never requested"),
    ]);

    let err = run_diagnosis(&client, &config(&dir, Provider::OpenAi, 1, 3))
        .await
        .unwrap_err();

    assert!(matches!(err, CaseDxError::QuotaExceeded { .. }), "got: {err}");
    assert_eq!(client.call_count(), 2);
    let run_dir = dir.path().join("gpt4v_result/gpt4v_result_temp_0_5_try1");
    assert!(run_dir.join("case-1.txt").exists());
    assert!(!run_dir.join("case-2.txt").exists());
    assert!(!run_dir.join("case-3.txt").exists());
}

#[tokio::test]
async fn exhausted_case_writes_no_result_but_logs_failure() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    seed_case(&dir.path().join("output"), 4);
    let client = Scripted::new(vec![Ok("I'm sorry, but I can't help with that."); 3]);
    let config = DiagnosisConfig::builder(Provider::OpenAi)
        .cases_dir(dir.path().join("output"))
        .results_root(dir.path())
        .cases(4, 4)
        .temperatures(vec![0.0])
        .tries(1)
        .max_attempts(3)
        .build()
        .unwrap();

    let summary = run_diagnosis(&client, &config).await.unwrap();

    assert_eq!(client.call_count(), 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.reports[0].attempts, 3);
    assert!(!dir
        .path()
        .join("gpt4v_result/gpt4v_result_temp_0_try1/case-4.txt")
        .exists());
    let log = fs::read_to_string(dir.path().join("process_log.txt")).unwrap();
    assert!(log.contains("case-4"), "got: {log}");
    assert_eq!(log.lines().count(), 1);
}

#[tokio::test]
async fn folders_follow_temperature_and_try() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    seed_case(&dir.path().join("output"), 1);
    let client = Scripted::always("1. Lymphoma (6/10) ...");
    let config = DiagnosisConfig::builder(Provider::Gemini)
        .cases_dir(dir.path().join("output"))
        .results_root(dir.path())
        .cases(1, 1)
        .temperatures(vec![0.0, 1.0])
        .tries(2)
        .build()
        .unwrap();

    let summary = run_diagnosis(&client, &config).await.unwrap();

    assert_eq!(summary.saved, 4);
    for folder in [
        "gemini_result_temp_0_try1",
        "gemini_result_temp_0_try2",
        "gemini_result_temp_1_try1",
        "gemini_result_temp_1_try2",
    ] {
        let path = dir.path().join("gemini_result").join(folder).join("case-1.txt");
        assert!(path.is_file(), "missing {}", path.display());
    }
    let temps: Vec<f32> = client.calls.lock().unwrap().iter().map(|c| c.2).collect();
    assert_eq!(temps, vec![0.0, 0.0, 1.0, 1.0]);
}

#[tokio::test]
async fn unreadable_history_fails_case_and_run_continues() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cases_dir = dir.path().join("output");
    seed_case(&cases_dir, 1);
    seed_case(&cases_dir, 2);
    fs::write(
        CaseLayout::new(&cases_dir, &cases_dir).history_file(CaseId(1)),
        [0xFF, 0xFE],
    )
    .unwrap();
    let events = Arc::new(Events::default());
    let client = Scripted::always("1. Endocarditis (8/10) ...");
    let config = DiagnosisConfig::builder(Provider::OpenAi)
        .cases_dir(&cases_dir)
        .results_root(dir.path())
        .cases(1, 2)
        .temperatures(vec![0.5])
        .tries(1)
        .progress_callback(events.clone())
        .build()
        .unwrap();

    let summary = run_diagnosis(&client, &config).await.unwrap();

    assert_eq!(client.call_count(), 1);
    assert_eq!(summary.saved, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.reports[0].status, CaseStatus::Failed);
    assert!(matches!(
        summary.reports[0].error,
        Some(CaseError::ReadFailed { case: 1, .. })
    ));
    let run_dir = dir.path().join("gpt4v_result/gpt4v_result_temp_0_5_try1");
    assert!(!run_dir.join("case-1.txt").exists());
    assert!(run_dir.join("case-2.txt").is_file());
    assert_eq!(events.errors.load(Ordering::SeqCst), 1);
    assert_eq!(events.run_complete.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn quota_abort_still_reports_to_callback() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    for case in 1..=2 {
        seed_case(&dir.path().join("output"), case);
    }
    let events = Arc::new(Events::default());
    let client = Scripted::new(vec![
        Ok("1. Sarcoidosis ..."),
        Err("Quota exceeded for requests per day"),
    ]);
    let config = DiagnosisConfig::builder(Provider::Gemini)
        .cases_dir(dir.path().join("output"))
        .results_root(dir.path())
        .cases(1, 2)
        .temperatures(vec![0.5])
        .tries(1)
        .progress_callback(events.clone())
        .build()
        .unwrap();

    let err = run_diagnosis(&client, &config).await.unwrap_err();

    assert!(matches!(err, CaseDxError::QuotaExceeded { .. }), "got: {err}");
    assert_eq!(events.completed.load(Ordering::SeqCst), 1);
    assert_eq!(events.errors.load(Ordering::SeqCst), 1);
    assert_eq!(events.run_complete.load(Ordering::SeqCst), 1);
}
