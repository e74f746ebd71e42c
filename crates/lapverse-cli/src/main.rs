//! lapverse - runs the control plane in-process with demo collaborators.
//!
//! Submits one task and one competition through the API boundary, waits for
//! both to finish, prints their status and a metrics snapshot as JSON, then
//! shuts the worker pools down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::Parser;
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lapverse_core::api::{Api, ApiReply, IDEMPOTENCY_KEY, SubmissionKind, TENANT_ID};
use lapverse_core::domain::{Task, Usd};
use lapverse_core::ports::{
    DependencyError, PostReceipt, PromotionPipeline, PromotionRequest, Sentiment, SentimentLabel,
    SentimentService, SocialPoster, TaskExecution, TaskExecutor,
};
use lapverse_core::{CoreBuilder, CoreConfig, CoreError};

#[derive(Parser)]
#[command(name = "lapverse")]
#[command(about = "LapVerse control plane demo", long_about = None)]
struct Args {
    /// JSON config file; every section is optional
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Tenant to submit as
    #[arg(long, default_value = "demo")]
    tenant: String,

    /// MRR (USD) used when the config does not list the tenant
    #[arg(long, default_value_t = 1000.0)]
    mrr: f64,

    /// Give up waiting after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Keyword sentiment.
struct KeywordSentiment;

#[async_trait]
impl SentimentService for KeywordSentiment {
    async fn analyze(&self, content: &str) -> Result<Sentiment, DependencyError> {
        let lower = content.to_lowercase();
        let label = if ["launch", "new", "great", "win"].iter().any(|w| lower.contains(w)) {
            SentimentLabel::Positive
        } else if ["outage", "delay", "recall"].iter().any(|w| lower.contains(w)) {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        };
        Ok(Sentiment {
            label,
            confidence: 0.8,
        })
    }
}

/// Posts everywhere except `offline`, which always fails and exercises the fallback.
struct DemoPoster;

#[async_trait]
impl SocialPoster for DemoPoster {
    async fn share(&self, platform: &str, _content: &str) -> Result<PostReceipt, DependencyError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if platform == "offline" {
            return Err(DependencyError::Failed(format!("{platform} rejected the post")));
        }
        Ok(PostReceipt {
            platform: platform.to_string(),
            post_id: format!("{platform}-{}", ulid::Ulid::new()),
        })
    }
}

/// Charges $0.01 per word of the description.
struct WordCountExecutor;

#[async_trait]
impl TaskExecutor for WordCountExecutor {
    async fn execute(&self, task: &Task) -> Result<TaskExecution, CoreError> {
        let words = task.payload.description.split_whitespace().count();
        Ok(TaskExecution {
            output: json!({ "words": words, "type": task.task_type }),
            cost_actual: Usd::from_dollars(0.01).times(u32::try_from(words).unwrap_or(u32::MAX)),
        })
    }
}

struct LoggingPipeline;

#[async_trait]
impl PromotionPipeline for LoggingPipeline {
    async fn promote(&self, request: &PromotionRequest) -> Result<(), CoreError> {
        info!(champion = %request.champion_id, metadata = %request.metadata, "promotion received");
        Ok(())
    }
}

fn accepted_id(kind: &str, reply: &ApiReply) -> Result<String> {
    if reply.status != 202 {
        bail!("{kind} rejected with {}: {}", reply.status, reply.body);
    }
    reply.body["id"]
        .as_str()
        .map(str::to_string)
        .context("accepted reply without id")
}

fn is_terminal(view: &Value) -> bool {
    matches!(
        view["status"].as_str(),
        Some("completed" | "failed" | "promoted" | "completed_no_evolution")
    )
}

fn print(label: &str, body: &Value) -> Result<()> {
    println!("{label}:\n{}", serde_json::to_string_pretty(body)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config = match &args.config {
        Some(path) => CoreConfig::from_path(path).with_context(|| format!("loading {}", path.display()))?,
        None => CoreConfig::default(),
    };
    config.tenants.entry(args.tenant.clone()).or_insert(args.mrr);

    let core = CoreBuilder::new(config)
        .task_executor(Arc::new(WordCountExecutor))
        .sentiment_service(Arc::new(KeywordSentiment))
        .social_poster(Arc::new(DemoPoster))
        .promotion_pipeline(Arc::new(LoggingPipeline))
        .build()?;
    let core = Arc::new(core);
    let running = core.start();
    let api = Api::new(Arc::clone(&core));

    let task_key = format!("demo-task-{}", ulid::Ulid::new());
    let task_headers = [(IDEMPOTENCY_KEY, task_key.as_str()), (TENANT_ID, args.tenant.as_str())];
    let task_body = json!({
        "type": "analysis",
        "description": "summarize this week's launch feedback",
        "priority": "high",
        "costCenter": "marketing",
        "requirements": { "complexity": "intermediate" }
    });
    let reply = api
        .submit(SubmissionKind::Task, &task_headers, task_body.to_string().as_bytes())
        .await;
    let task_id = accepted_id("task", &reply)?;

    let comp_key = format!("demo-competition-{}", ulid::Ulid::new());
    let comp_headers = [(IDEMPOTENCY_KEY, comp_key.as_str()), (TENANT_ID, args.tenant.as_str())];
    let comp_body = json!({
        "content": "New spring launch: faster sync, better search",
        "platforms": ["x", "linkedin", "offline"],
        "costCenter": "growth"
    });
    let reply = api
        .submit(SubmissionKind::Competition, &comp_headers, comp_body.to_string().as_bytes())
        .await;
    let competition_id = accepted_id("competition", &reply)?;
    info!(%task_id, %competition_id, "submitted");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout_secs);
    loop {
        let task = api.task(&task_id).await;
        let competition = api.competition(&competition_id).await;
        if is_terminal(&task.body) && is_terminal(&competition.body) {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(timeout_secs = args.timeout_secs, "gave up waiting");
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted");
                break;
            }
        }
    }

    running.shutdown().await;

    print("task", &api.task(&task_id).await.body)?;
    print("competition", &api.competition(&competition_id).await.body)?;
    print("budget", &api.budget(&task_headers).await.body)?;
    print("metrics", &api.metrics().await.body)?;
    Ok(())
}
