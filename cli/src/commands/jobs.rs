use anyhow::{Result, bail};
use chrono::NaiveDate;
use clap::ValueEnum;

use larder_core::Database;
use larder_core::jobs::JobSettings;
use larder_core::notify::PushNotifier;
use larder_core::suggestions::SuggestionSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum JobStep {
    CreatePrompts,
    Notify,
    Expire,
    Backfill,
}

/// Run the scheduled jobs for `date`: all of them, or just `only`.
pub(crate) fn cmd_jobs_run(
    db: &Database,
    date: NaiveDate,
    only: Option<JobStep>,
    notifier: &dyn PushNotifier,
    source: &dyn SuggestionSource,
    settings: &JobSettings,
    json: bool,
) -> Result<()> {
    let Some(step) = only else {
        let report = db.run_tick(date, notifier, source, settings);
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("Jobs for {date}:\n");
            println!("  Prompts created:    {}", report.prompts_created);
            println!(
                "  Prompts notified:   {} ({} failed)",
                report.prompts_notified.sent, report.prompts_notified.failed
            );
            println!("  Prompts expired:    {}", report.prompts_expired);
            println!(
                "  Suggestions:        {} created, {} existing, {} failed",
                report.suggestions.created, report.suggestions.existing, report.suggestions.failed
            );
            for e in &report.errors {
                eprintln!("Error: {e}");
            }
        }
        if !report.is_ok() {
            bail!("{} job step(s) failed", report.errors.len());
        }
        return Ok(());
    };

    let outcome = match step {
        JobStep::CreatePrompts => {
            serde_json::json!({ "prompts_created": db.create_prompts(date)? })
        }
        JobStep::Notify => {
            serde_json::json!({ "prompts_notified": db.notify_prompts(date, notifier, settings)? })
        }
        JobStep::Expire => {
            serde_json::json!({ "prompts_expired": db.expire_prompts(date, settings)? })
        }
        JobStep::Backfill => {
            serde_json::json!({ "suggestions": db.backfill_suggestions(date, source)? })
        }
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{date}: {outcome}");
    }
    Ok(())
}
