use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;

use prearc_sdk::{
    ArchiveRequest, ImportReport, MergeError, Notice, NoticeKind, Prearchive, Principal,
    RoutingOverrides, SdkError, SessionLocator, SiteConfig, TriggerOutcome,
};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let principal = Principal::user(cli.user);
    match cli.command {
        Command::Import(args) => cmd_import(config, &principal, args),
        Command::Validate(args) => cmd_validate(config, &principal, args),
        Command::Archive(args) => cmd_archive(config, &principal, args).await,
        Command::Config(args) => cmd_config(config, args),
    }
}

/// Relative paths in a config file are taken relative to the file.
fn load_config(path: Option<&Path>) -> anyhow::Result<SiteConfig> {
    let Some(path) = path else {
        return Ok(SiteConfig::default());
    };
    let config = SiteConfig::load(path)
        .with_context(|| format!("loading {}", path.display()))?;
    Ok(match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(base) => config.rooted_at(base),
        None => config,
    })
}

fn import_all(
    pa: &Prearchive,
    principal: &Principal,
    routing: &RoutingArgs,
    overrides: &RoutingOverrides,
) -> anyhow::Result<ImportReport> {
    if routing.paths.is_empty() {
        return Ok(pa.import_inbox(principal)?);
    }
    let mut total = ImportReport::default();
    for path in &routing.paths {
        let report = pa
            .import_path(principal, path, overrides)
            .with_context(|| format!("importing {}", path.display()))?;
        total.stored += report.stored;
        total.filtered += report.filtered;
        total.failed.extend(report.failed);
        total.sessions.extend(report.sessions);
        total.created.extend(report.created);
    }
    Ok(total)
}

fn print_report(report: &ImportReport) {
    println!(
        "{} {} stored, {} filtered, {} failed",
        "✓".green().bold(),
        report.stored.to_string().bold(),
        report.filtered,
        if report.failed.is_empty() {
            "0".normal()
        } else {
            report.failed.len().to_string().red()
        }
    );
    for (entry, error) in &report.failed {
        println!("  {} {}: {}", "✗".red(), entry, error.dimmed());
    }
}

fn print_sessions(
    pa: &Prearchive,
    sessions: &BTreeSet<SessionLocator>,
    created: &BTreeSet<SessionLocator>,
) -> anyhow::Result<()> {
    for locator in sessions {
        let Some(session) = pa.session(locator)? else {
            continue;
        };
        let mark = if created.contains(locator) { "new" } else { "   " };
        println!(
            "  {} {}  {}  subject={}  uid={}",
            mark.cyan(),
            locator.to_string().yellow(),
            session.status.to_string().bold(),
            session.subject.as_deref().unwrap_or("-"),
            session.study_instance_uid.dimmed(),
        );
    }
    Ok(())
}

fn print_notice(notice: &Notice) {
    let tag = match notice.kind {
        NoticeKind::Warning => "warning".yellow(),
        NoticeKind::Conflict => "conflict".red(),
        NoticeKind::Failure => "failure".red().bold(),
    };
    println!("    {:>2} {} {}", notice.code.to_string().bold(), tag, notice.message);
}

fn cmd_import(config: SiteConfig, principal: &Principal, args: ImportArgs) -> anyhow::Result<()> {
    let pa = Prearchive::open(config)?;
    let mut overrides = args.routing.overrides();
    overrides.custom_processing = args.custom_processing;
    let report = import_all(&pa, principal, &args.routing, &overrides)?;
    print_report(&report);
    print_sessions(&pa, &report.sessions, &report.created)?;
    Ok(())
}

fn cmd_validate(config: SiteConfig, principal: &Principal, args: ArchiveArgs) -> anyhow::Result<()> {
    let pa = Prearchive::open(config)?;
    let report = import_all(&pa, principal, &args.routing, &args.routing.overrides())?;
    print_report(&report);

    let mut blocked = 0;
    for locator in &report.sessions {
        let request = ArchiveRequest::new(locator.clone(), principal.clone()).with_params(args.params());
        let notices = pa.validate(&request)?;
        let blocking = notices.iter().any(Notice::is_blocking);
        let verdict = if blocking {
            blocked += 1;
            "blocked".red().bold()
        } else {
            "ok".green().bold()
        };
        println!("  {} {}", locator.to_string().yellow(), verdict);
        notices.iter().for_each(print_notice);
    }
    if blocked > 0 {
        bail!("{blocked} of {} session(s) cannot be archived", report.sessions.len());
    }
    Ok(())
}

async fn cmd_archive(config: SiteConfig, principal: &Principal, args: ArchiveArgs) -> anyhow::Result<()> {
    let pa = Prearchive::open(config)?;
    let report = import_all(&pa, principal, &args.routing, &args.routing.overrides())?;
    print_report(&report);

    let mut failed = 0;
    for locator in &report.sessions {
        let request = ArchiveRequest::new(locator.clone(), principal.clone()).with_params(args.params());
        match pa.archive_with_timeout(request).await {
            TriggerOutcome::Completed(outcome) => {
                println!(
                    "  {} {} → {} ({}/{}, {} scan(s){})",
                    "✓".green().bold(),
                    locator.to_string().yellow(),
                    outcome.session_id.bold(),
                    outcome.project,
                    outcome.label,
                    outcome.scans,
                    if outcome.quarantined { ", quarantined" } else { "" },
                );
                outcome.warnings.iter().for_each(print_notice);
            }
            TriggerOutcome::Failed(e) => {
                failed += 1;
                println!("  {} {}: {}", "✗".red().bold(), locator.to_string().yellow(), e);
                if let SdkError::Merge(MergeError::Conflict(notices)) = &e {
                    notices.iter().for_each(print_notice);
                }
            }
            TriggerOutcome::Inconclusive => {
                failed += 1;
                println!(
                    "  {} {}: still running after {}s",
                    "?".yellow().bold(),
                    locator.to_string().yellow(),
                    pa.config().archive_timeout_secs
                );
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} session(s) not archived", report.sessions.len());
    }
    Ok(())
}

fn cmd_config(config: SiteConfig, args: ConfigArgs) -> anyhow::Result<()> {
    let shown = if args.defaults { SiteConfig::default() } else { config };
    print!("{}", shown.to_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn config_paths_are_relative_to_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("site.toml");
        fs::write(&path, "archive_root = \"arc\"\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.archive_root, tmp.path().join("arc"));
        assert_eq!(config.prearchive_root, tmp.path().join("prearchive"));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&tmp.path().join("nope.toml"))).is_err());
        assert_eq!(load_config(None).unwrap(), SiteConfig::default());
    }
}
