//! Sync command implementation.

use clap::Args;
use listmirror_engine::{
    DuplicateMirrorPolicy, MirrorConfig, MirrorEngine, MirrorError, MirrorResult,
    ReconciliationSummary, ThrottlePolicy, XrpcClient, DEFAULT_MIRROR_DESCRIPTION,
};
use listmirror_protocol::ListHandle;
use std::fmt::Write;
use std::time::Duration;
use tracing::warn;

const DEFAULT_SERVICE: &str = "https://bsky.social";
const DEFAULT_SOURCE_LIST: &str =
    "at://did:plc:k3lft27u2pjqp2ptidkne7xr/app.bsky.graph.list/3lngcmewutk2z";
const DEFAULT_MIRROR_NAME: &str = "Verified Accounts (modlist)";

/// Connection and tuning options shared by `sync` and `diff`.
#[derive(Debug, Clone, Args)]
pub struct SyncArgs {
    /// Service URL
    #[arg(long, env = "LISTMIRROR_SERVICE", default_value = DEFAULT_SERVICE)]
    pub service: String,

    /// Account handle, email or DID
    #[arg(long, env = "BSKY_USERNAME")]
    pub identifier: String,

    /// Account or app password
    #[arg(long, env = "BSKY_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// AT-URI of the list to mirror
    #[arg(long, env = "LISTMIRROR_SOURCE_LIST", default_value = DEFAULT_SOURCE_LIST)]
    pub source_list: String,

    /// Name of the moderation list to keep in sync
    #[arg(long, env = "LISTMIRROR_MIRROR_NAME", default_value = DEFAULT_MIRROR_NAME)]
    pub mirror_name: String,

    /// Description used if the moderation list has to be created
    #[arg(
        long,
        env = "LISTMIRROR_MIRROR_DESCRIPTION",
        default_value = DEFAULT_MIRROR_DESCRIPTION
    )]
    pub mirror_description: String,

    /// Items per page on paginated reads (1-100)
    #[arg(long, env = "LISTMIRROR_PAGE_SIZE", default_value_t = 100)]
    pub page_size: u32,

    /// Changes applied concurrently per batch
    #[arg(long, env = "LISTMIRROR_BATCH_SIZE", default_value_t = 10)]
    pub batch_size: usize,

    /// Pause between batches in milliseconds
    #[arg(long, env = "LISTMIRROR_BATCH_PAUSE_MS", default_value_t = 1000)]
    pub batch_pause_ms: u64,

    /// Consecutive rate-limited responses before the run stops
    #[arg(long, env = "LISTMIRROR_THROTTLE_MAX", default_value_t = 3)]
    pub throttle_max: u32,

    /// Wait before retrying a rate-limited call, in seconds
    #[arg(long, env = "LISTMIRROR_THROTTLE_BACKOFF_SECS", default_value_t = 60)]
    pub throttle_backoff_secs: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "LISTMIRROR_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Fail instead of picking the first match when several lists share the mirror name
    #[arg(long)]
    pub fail_on_duplicate_mirror: bool,
}

impl SyncArgs {
    /// Builds the engine configuration.
    pub fn mirror_config(
        &self,
        dry_run: bool,
    ) -> Result<MirrorConfig, Box<dyn std::error::Error>> {
        let source = ListHandle::parse(&self.source_list)?;
        let duplicate_policy = if self.fail_on_duplicate_mirror {
            DuplicateMirrorPolicy::Fail
        } else {
            DuplicateMirrorPolicy::FirstMatch
        };

        let config = MirrorConfig::new(source, self.mirror_name.as_str())
            .with_mirror_description(self.mirror_description.as_str())
            .with_page_size(self.page_size)
            .with_batch_size(self.batch_size)
            .with_batch_pause(Duration::from_millis(self.batch_pause_ms))
            .with_throttle(ThrottlePolicy::new(
                self.throttle_max,
                Duration::from_secs(self.throttle_backoff_secs),
            ))
            .with_duplicate_policy(duplicate_policy)
            .with_dry_run(dry_run);
        config.validate()?;
        Ok(config)
    }
}

/// Runs the sync command.
pub async fn run(
    args: &SyncArgs,
    dry_run: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.mirror_config(dry_run)?;

    let timeout = Duration::from_secs(args.timeout_secs);
    let mut client = XrpcClient::new(args.service.as_str(), timeout)?;
    let account = client
        .login(&args.identifier, &args.password)
        .await
        .map_err(|e| MirrorError::Session(e.to_string()))?;

    let engine = MirrorEngine::new(config, client, account);
    finish(engine.run().await, format)
}

/// Reports the outcome of a run.
///
/// A run stopped by rate limiting prints its partial summary and counts as
/// success. Every other error is returned for the caller to turn into a
/// failing exit status.
pub fn finish(
    result: MirrorResult<ReconciliationSummary>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match result {
        Ok(summary) => print_summary(&summary, format),
        Err(err) if err.is_benign() => {
            warn!(error = %err, "Run ended early, the next run will continue");
            if let Some(summary) = err.partial_summary() {
                print_summary(summary, format)?;
            }
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn print_summary(
    summary: &ReconciliationSummary,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        _ => {
            print!("{}", render_text(summary)?);
        }
    }
    Ok(())
}

fn status(summary: &ReconciliationSummary) -> &'static str {
    if summary.aborted {
        "stopped early (rate limited)"
    } else if summary.dry_run {
        "dry run, no changes applied"
    } else if summary.failed.is_empty() {
        "completed"
    } else {
        "completed with failures"
    }
}

/// Renders the human-readable summary.
pub fn render_text(summary: &ReconciliationSummary) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    write_text(&mut out, summary)?;
    Ok(out)
}

fn write_text(out: &mut String, summary: &ReconciliationSummary) -> std::fmt::Result {
    writeln!(out, "List Mirror Reconciliation")?;
    writeln!(out, "==========================")?;
    writeln!(out)?;
    writeln!(out, "Status: {}", status(summary))?;
    if let Some(mirror) = &summary.mirror {
        let created = if summary.mirror_created { " (created)" } else { "" };
        writeln!(out, "Mirror: {mirror}{created}")?;
    }
    writeln!(out)?;
    writeln!(out, "Membership:")?;
    writeln!(out, "  Source members:  {}", summary.source_count)?;
    writeln!(out, "  Mirror members:  {}", summary.mirror_count)?;
    writeln!(out, "  To add:          {}", summary.planned_additions)?;
    writeln!(out, "  To remove:       {}", summary.planned_removals)?;

    if !summary.dry_run {
        writeln!(out)?;
        writeln!(out, "Changes:")?;
        writeln!(out, "  Added:           {}", summary.added)?;
        writeln!(out, "  Removed:         {}", summary.removed)?;
        writeln!(out, "  Already present: {}", summary.already_present)?;
        writeln!(out, "  Already absent:  {}", summary.already_absent)?;
        writeln!(out, "  Failed:          {}", summary.failed.len())?;
        writeln!(out, "  Skipped:         {}", summary.skipped)?;
    }

    if !summary.failed.is_empty() {
        writeln!(out)?;
        writeln!(out, "Failures:")?;
        for failure in &summary.failed {
            writeln!(out, "  {failure}")?;
        }
    }

    writeln!(out)?;
    writeln!(out, "Rate limited responses: {}", summary.throttle_hits)?;
    writeln!(out, "Duration: {} ms", summary.duration_ms)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use listmirror_engine::{Intent, PerItemError, ServiceError};
    use listmirror_protocol::Subject;

    fn args() -> SyncArgs {
        SyncArgs {
            service: DEFAULT_SERVICE.to_string(),
            identifier: "me.bsky.social".to_string(),
            password: "app-password".to_string(),
            source_list: DEFAULT_SOURCE_LIST.to_string(),
            mirror_name: DEFAULT_MIRROR_NAME.to_string(),
            mirror_description: DEFAULT_MIRROR_DESCRIPTION.to_string(),
            page_size: 100,
            batch_size: 10,
            batch_pause_ms: 1000,
            throttle_max: 3,
            throttle_backoff_secs: 60,
            timeout_secs: 30,
            fail_on_duplicate_mirror: false,
        }
    }

    #[test]
    fn builds_config_from_args() {
        let config = SyncArgs {
            batch_size: 25,
            fail_on_duplicate_mirror: true,
            ..args()
        }
        .mirror_config(true)
        .unwrap();

        assert_eq!(config.source_list.to_string(), DEFAULT_SOURCE_LIST);
        assert_eq!(config.mirror_name, DEFAULT_MIRROR_NAME);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.batch_pause, Duration::from_secs(1));
        assert_eq!(config.throttle.backoff, Duration::from_secs(60));
        assert_eq!(config.duplicate_policy, DuplicateMirrorPolicy::Fail);
        assert!(config.dry_run);
    }

    #[test]
    fn rejects_bad_source_and_page_size() {
        let bad_source = SyncArgs {
            source_list: "https://bsky.app/profile/x/lists/y".to_string(),
            ..args()
        };
        assert!(bad_source.mirror_config(false).is_err());

        let bad_page = SyncArgs {
            page_size: 500,
            ..args()
        };
        assert!(bad_page.mirror_config(false).is_err());
    }

    #[test]
    fn text_summary_lists_counts_and_failures() {
        let summary = ReconciliationSummary {
            mirror: Some(
                ListHandle::parse("at://did:plc:me/app.bsky.graph.list/3lmod").unwrap(),
            ),
            planned_additions: 3,
            added: 2,
            removed: 1,
            failed: vec![PerItemError {
                subject: Subject::new("did:plc:gone"),
                action: Intent::Add,
                source: ServiceError::other("InvalidRequest: unknown subject"),
            }],
            ..Default::default()
        };

        let text = render_text(&summary).unwrap();
        assert!(text.contains("Status: completed with failures"));
        assert!(text.contains("Mirror: at://did:plc:me/app.bsky.graph.list/3lmod"));
        assert!(text.contains("Added:           2"));
        assert!(text.contains("add did:plc:gone failed"));
    }

    #[test]
    fn dry_run_summary_omits_changes() {
        let summary = ReconciliationSummary {
            dry_run: true,
            planned_additions: 4,
            ..Default::default()
        };
        let text = render_text(&summary).unwrap();
        assert!(text.contains("dry run"));
        assert!(text.contains("To add:          4"));
        assert!(!text.contains("Changes:"));
    }

    #[test]
    fn throttle_abort_finishes_successfully() {
        let aborted = MirrorError::ThrottleExhausted {
            operation: "createRecord".to_string(),
            attempts: 3,
            summary: Box::new(ReconciliationSummary {
                aborted: true,
                added: 4,
                skipped: 6,
                ..Default::default()
            }),
        };
        assert!(finish(Err(aborted), "json").is_ok());
        assert!(finish(Err(MirrorError::throttle_exhausted("getList", 3)), "text").is_ok());
    }

    #[test]
    fn fatal_errors_are_returned() {
        let source = ListHandle::parse(DEFAULT_SOURCE_LIST).unwrap();
        let retrieval = MirrorError::Retrieval {
            list: source,
            source: ServiceError::other("HTTP 502"),
        };
        let err = finish(Err(retrieval), "text").unwrap_err();
        assert!(err.to_string().starts_with("failed to read list"));

        assert!(finish(Err(MirrorError::Session("bad password".into())), "text").is_err());
        assert!(finish(Err(MirrorError::Config("page size".into())), "json").is_err());
    }

    #[test]
    fn completed_run_finishes_successfully() {
        assert!(finish(Ok(ReconciliationSummary::default()), "text").is_ok());
    }
}
