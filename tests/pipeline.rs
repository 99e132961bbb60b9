//! End-to-end pipeline tests
//!
//! These drive the real runtime: document store and queue broker on a temp
//! directory, in-memory blob storage, the mock AI provider, and live worker
//! pools. Each test submits work through the service surface and polls the
//! job to a terminal state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cvforge::ai::{AiClient, CallOptions, ChatMessage, MockProvider, Provider};
use cvforge::config::{Config, StorageProvider};
use cvforge::domain::{ChangeType, CvContent, JobStatus, ParsingStatus};
use cvforge::error::ErrorCode;
use cvforge::runtime::Core;
use cvforge::services::ats::StartAnalysis;
use cvforge::services::generation::StartGeneration;
use cvforge::services::optimize::StartOptimization;
use cvforge::services::parsing::StartParsing;
use cvforge::versions::content_hash;
use tempfile::TempDir;
use tokio::sync::watch;

const USER: &str = "user-e2e";

struct TestContext {
    core: Core,
    shutdown: watch::Sender<bool>,
    _temp: TempDir,
}

impl TestContext {
    async fn setup() -> Self {
        Self::setup_with_ai(None).await
    }

    async fn setup_with_ai(ai: Option<AiClient>) -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.runtime.data_dir = temp.path().to_path_buf();
        config.storage.provider = StorageProvider::Memory;

        let ai = ai.unwrap_or_else(|| {
            AiClient::with_provider(config.ai.clone(), Arc::new(MockProvider::new()))
        });
        let core = Core::build_with_ai(config, ai).unwrap();

        let (shutdown, rx) = watch::channel(false);
        core.start_workers(rx);

        Self {
            core,
            shutdown,
            _temp: temp,
        }
    }

    async fn wait_terminal(&self, job_id: &str, max: Duration) -> JobStatus {
        let deadline = tokio::time::Instant::now() + max;
        loop {
            let job = self.core.jobs.get(USER, job_id).unwrap();
            if job.status.is_terminal() {
                return job.status;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("job {job_id} still {:?} after {max:?}", job.status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

fn content_named(name: &str) -> CvContent {
    serde_json::from_value(serde_json::json!({
        "personal": {"name": name, "email": "e2e@example.com"},
        "summary": "Backend engineer, ten years of queue plumbing.",
        "experience": [{
            "title": "Senior Engineer",
            "company": "Example Corp",
            "current": true,
            "highlights": ["Built the delivery pipeline"],
        }],
        "skills": {"technical": ["Rust", "PostgreSQL"]},
    }))
    .unwrap()
}

#[tokio::test]
async fn test_parse_happy_path() {
    let ctx = TestContext::setup().await;

    let cv = ctx
        .core
        .cvs
        .create_from_upload(
            USER,
            "Uploaded CV",
            "cv.txt",
            "text/plain",
            b"Jane Doe\n\nEXPERIENCE\nSenior Engineer at Example Corp\n\nSKILLS\nRust, SQL\n"
                .to_vec(),
        )
        .await
        .unwrap();
    assert_eq!(cv.parsing_status, ParsingStatus::Pending);

    let job_id = ctx
        .core
        .parsing
        .start(USER, &cv.id, StartParsing::default())
        .unwrap();

    // Status is observable from the service surface while the job runs
    let view = ctx.core.parsing.status(USER, &job_id).unwrap();
    assert!(matches!(
        view.status,
        JobStatus::Pending | JobStatus::Processing | JobStatus::Completed
    ));

    let status = ctx.wait_terminal(&job_id, Duration::from_secs(15)).await;
    assert_eq!(status, JobStatus::Completed);

    let job = ctx.core.jobs.get(USER, &job_id).unwrap();
    assert_eq!(job.progress, 100);

    let cv = ctx.core.cvs.get(USER, &cv.id).unwrap();
    assert_eq!(cv.parsing_status, ParsingStatus::Parsed);
    assert_eq!(cv.content.personal.name.as_deref(), Some("Jane Doe"));

    let versions = ctx.core.cvs.list_versions(USER, &cv.id).unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version_number, 1);
    assert_eq!(versions[0].change_type, ChangeType::Parsing);
    assert!(versions[0].is_active);
    // CV content mirrors the active version
    assert_eq!(content_hash(&cv.content), versions[0].content_hash);

    let parsed = ctx.core.parsing.result(USER, &job_id).unwrap();
    assert_eq!(parsed.personal.name.as_deref(), Some("Jane Doe"));
}

#[tokio::test]
async fn test_parse_twice_creates_no_second_version() {
    let ctx = TestContext::setup().await;

    let cv = ctx
        .core
        .cvs
        .create_from_upload(USER, "CV", "cv.txt", "text/plain", b"Jane Doe\nSKILLS\nRust".to_vec())
        .await
        .unwrap();

    let first = ctx
        .core
        .parsing
        .start(USER, &cv.id, StartParsing::default())
        .unwrap();
    assert_eq!(
        ctx.wait_terminal(&first, Duration::from_secs(15)).await,
        JobStatus::Completed
    );

    let second = ctx
        .core
        .parsing
        .start(USER, &cv.id, StartParsing::default())
        .unwrap();
    assert_eq!(
        ctx.wait_terminal(&second, Duration::from_secs(15)).await,
        JobStatus::Completed
    );

    // Identical content: same hash, single version, still `parsed`
    let versions = ctx.core.cvs.list_versions(USER, &cv.id).unwrap();
    assert_eq!(versions.len(), 1);
    let job = ctx.core.jobs.get(USER, &second).unwrap();
    assert_eq!(job.result.unwrap()["noChange"], true);
    assert_eq!(
        ctx.core.cvs.get(USER, &cv.id).unwrap().parsing_status,
        ParsingStatus::Parsed
    );
}

#[tokio::test]
async fn test_optimize_no_change() {
    let ctx = TestContext::setup().await;

    // The mock optimizer echoes its input, so the hashes match
    let cv = ctx
        .core
        .cvs
        .create(USER, "CV", Some(content_named("Jane Doe")))
        .unwrap();

    let job_id = ctx
        .core
        .optimize
        .start(
            USER,
            &cv.id,
            StartOptimization {
                target_role: "Staff Engineer".to_string(),
                sections: Vec::new(),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(
        ctx.wait_terminal(&job_id, Duration::from_secs(15)).await,
        JobStatus::Completed
    );

    let job = ctx.core.jobs.get(USER, &job_id).unwrap();
    assert_eq!(job.result.unwrap()["noChange"], true);

    let versions = ctx.core.cvs.list_versions(USER, &cv.id).unwrap();
    assert_eq!(versions.len(), 1, "no new version on unchanged content");
}

#[tokio::test]
async fn test_optimize_persists_inactive_version() {
    let changed = content_named("Jane Doe Improved");
    let scripted = MockProvider::with_responses([serde_json::to_string(&changed).unwrap()]);
    let ai = AiClient::with_provider(Config::default().ai, Arc::new(scripted));
    let ctx2 = TestContext::setup_with_ai(Some(ai)).await;

    let cv = ctx2
        .core
        .cvs
        .create(USER, "CV", Some(content_named("Jane Doe")))
        .unwrap();

    let job_id = ctx2
        .core
        .optimize
        .start(
            USER,
            &cv.id,
            StartOptimization {
                target_role: "Staff Engineer".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(
        ctx2.wait_terminal(&job_id, Duration::from_secs(15)).await,
        JobStatus::Completed
    );

    let versions = ctx2.core.cvs.list_versions(USER, &cv.id).unwrap();
    assert_eq!(versions.len(), 2);
    let optimized = versions.iter().find(|v| v.version_number == 2).unwrap();
    assert_eq!(optimized.change_type, ChangeType::Optimization);
    // Activation is explicit, never automatic
    assert!(!optimized.is_active);
    assert_eq!(
        ctx2.core.cvs.get(USER, &cv.id).unwrap().content.personal.name.as_deref(),
        Some("Jane Doe")
    );

    // Usage metered on success
    let user = ctx2.core.store.get_user(USER).unwrap().unwrap();
    assert_eq!(user.usage.enhancements, 1);

    // Explicit activation flips content
    ctx2.core
        .cvs
        .activate_version(USER, &cv.id, &optimized.id)
        .unwrap();
    assert_eq!(
        ctx2.core.cvs.get(USER, &cv.id).unwrap().content.personal.name.as_deref(),
        Some("Jane Doe Improved")
    );
}

/// Provider that stalls before answering, leaving a window to cancel.
struct SlowProvider {
    inner: MockProvider,
    delay: Duration,
}

#[async_trait]
impl Provider for SlowProvider {
    async fn call(
        &self,
        messages: &[ChatMessage],
        opts: &CallOptions,
    ) -> cvforge::ai::Result<String> {
        tokio::time::sleep(self.delay).await;
        self.inner.call(messages, opts).await
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[tokio::test]
async fn test_cancel_during_llm_call() {
    let config = Config::default();
    let ai = AiClient::with_provider(
        config.ai.clone(),
        Arc::new(SlowProvider {
            inner: MockProvider::new(),
            delay: Duration::from_secs(2),
        }),
    );
    let ctx = TestContext::setup_with_ai(Some(ai)).await;

    let cv = ctx
        .core
        .cvs
        .create(USER, "CV", Some(content_named("Jane Doe")))
        .unwrap();
    let user_before = ctx.core.store.get_user(USER).unwrap().unwrap();

    let job_id = ctx
        .core
        .optimize
        .start(
            USER,
            &cv.id,
            StartOptimization {
                target_role: "Staff Engineer".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

    // Wait until the job is mid-flight, then request cancellation
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = ctx.core.jobs.get(USER, &job_id).unwrap();
        if job.status == JobStatus::Processing {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "job never started");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    ctx.core.jobs.cancel(USER, &job_id).unwrap();

    let status = ctx.wait_terminal(&job_id, Duration::from_secs(15)).await;
    assert_eq!(status, JobStatus::Cancelled);

    // No version appeared and the usage counter did not move
    let versions = ctx.core.cvs.list_versions(USER, &cv.id).unwrap();
    assert_eq!(versions.len(), 1);
    let user_after = ctx.core.store.get_user(USER).unwrap().unwrap();
    assert_eq!(user_after.usage.enhancements, user_before.usage.enhancements);
}

#[tokio::test]
async fn test_ats_score_bounds_with_empty_description() {
    let ctx = TestContext::setup().await;

    let cv = ctx
        .core
        .cvs
        .create(USER, "CV", Some(content_named("Jane Doe")))
        .unwrap();

    let job_id = ctx
        .core
        .ats
        .start(
            USER,
            &cv.id,
            StartAnalysis {
                target_job: Some(cvforge::domain::TargetJob {
                    title: "Platform Engineer".to_string(),
                    description: String::new(),
                    requirements: Vec::new(),
                }),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(
        ctx.wait_terminal(&job_id, Duration::from_secs(15)).await,
        JobStatus::Completed
    );

    let report = ctx.core.ats.result(USER, &job_id).unwrap();
    assert!(report.overall_score <= 100);
    assert!(report.breakdown.structure <= 40.0);
    assert!(report.breakdown.skills <= 25.0);
    assert!(report.breakdown.experience <= 25.0);
    assert!(report.breakdown.formatting <= 10.0);
    assert_eq!(report.overall_score, report.breakdown.overall_score());
}

#[tokio::test]
async fn test_generation_docx_download_and_determinism() {
    let ctx = TestContext::setup().await;

    let cv = ctx
        .core
        .cvs
        .create(USER, "CV", Some(content_named("Jane Doe")))
        .unwrap();

    let start = |ctx: &TestContext| {
        ctx.core
            .generation
            .start(
                USER,
                StartGeneration {
                    cv_id: Some(cv.id.clone()),
                    output_format: "docx".to_string(),
                    template_id: "professional".to_string(),
                    ..Default::default()
                },
            )
            .unwrap()
    };

    let first_job = start(&ctx);
    assert_eq!(
        ctx.wait_terminal(&first_job, Duration::from_secs(15)).await,
        JobStatus::Completed
    );

    let downloaded = ctx.core.generation.download(USER, &first_job).await.unwrap();
    assert_eq!(
        downloaded.content_type,
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    );
    assert_eq!(&downloaded.bytes[..2], b"PK");
    assert_eq!(downloaded.file_name, "cv.docx");

    // Identical inputs produce identical bytes
    let second_job = start(&ctx);
    assert_eq!(
        ctx.wait_terminal(&second_job, Duration::from_secs(15)).await,
        JobStatus::Completed
    );
    let second = ctx.core.generation.download(USER, &second_job).await.unwrap();
    assert_eq!(downloaded.bytes, second.bytes);

    // Generations metered per run
    let user = ctx.core.store.get_user(USER).unwrap().unwrap();
    assert_eq!(user.usage.generations, 2);
}

#[tokio::test]
async fn test_priority_boundaries() {
    let ctx = TestContext::setup().await;
    let cv = ctx
        .core
        .cvs
        .create(USER, "CV", Some(content_named("Jane Doe")))
        .unwrap();

    for priority in [-1, 11] {
        let err = ctx
            .core
            .optimize
            .start(
                USER,
                &cv.id,
                StartOptimization {
                    target_role: "Engineer".to_string(),
                    priority: Some(priority),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    for priority in [0, 10] {
        assert!(
            ctx.core
                .optimize
                .start(
                    USER,
                    &cv.id,
                    StartOptimization {
                        target_role: "Engineer".to_string(),
                        priority: Some(priority),
                        ..Default::default()
                    },
                )
                .is_ok()
        );
    }
}

#[tokio::test]
async fn test_job_retry_links_fresh_job() {
    let ctx = TestContext::setup().await;

    // A CV without an uploaded file: the parse fails non-retryably
    let cv = ctx
        .core
        .cvs
        .create_from_upload(USER, "CV", "cv.bin", "image/png", b"GIF89a".to_vec())
        .await
        .unwrap();
    let job_id = ctx
        .core
        .parsing
        .start(USER, &cv.id, StartParsing::default())
        .unwrap();
    assert_eq!(
        ctx.wait_terminal(&job_id, Duration::from_secs(15)).await,
        JobStatus::Failed
    );

    let fresh = ctx.core.jobs.retry(USER, &job_id).unwrap();
    assert_eq!(fresh.retry_of.as_deref(), Some(job_id.as_str()));
    assert!(ctx.wait_terminal(&fresh.id, Duration::from_secs(15)).await.is_terminal());
}
