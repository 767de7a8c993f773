use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use prearc_sdk::{ArchiveParams, RoutingOverrides};

#[derive(Parser)]
#[command(
    name = "prearc",
    about = "Prearchive: stage incoming imaging sessions and archive them",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Site configuration (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Acting user; checked against project permissions.
    #[arg(long, global = true, default_value = "prearc")]
    pub user: String,
}

#[derive(Subcommand)]
pub enum Command {
    /// Import files, directories or zip archives into the prearchive
    Import(ImportArgs),
    /// Import, then report what archiving each session would run into
    Validate(ArchiveArgs),
    /// Import, then archive each session
    Archive(ArchiveArgs),
    /// Print the effective site configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct RoutingArgs {
    /// Paths to import; the configured inbox when none are given.
    pub paths: Vec<PathBuf>,
    #[arg(long)]
    pub project: Option<String>,
    #[arg(long)]
    pub subject: Option<String>,
    /// Session label for every imported object.
    #[arg(long)]
    pub session: Option<String>,
    #[arg(long)]
    pub visit: Option<String>,
    /// Write straight into the archive area when possible.
    #[arg(long)]
    pub direct: bool,
    /// Objects were anonymized upstream.
    #[arg(long)]
    pub pre_anonymized: bool,
    /// Always name stored files after their SOP instance UID.
    #[arg(long)]
    pub force_rename: bool,
    /// Sender identifier recorded on new sessions.
    #[arg(long)]
    pub source: Option<String>,
}

impl RoutingArgs {
    pub fn overrides(&self) -> RoutingOverrides {
        RoutingOverrides {
            project: self.project.clone(),
            subject: self.subject.clone(),
            session: self.session.clone(),
            visit: self.visit.clone(),
            direct_archive: self.direct,
            pre_anonymized: self.pre_anonymized,
            force_rename: self.force_rename,
            source: self.source.clone(),
            ..RoutingOverrides::default()
        }
    }
}

#[derive(Args)]
pub struct ImportArgs {
    #[command(flatten)]
    pub routing: RoutingArgs,
    /// Skip queueing archives for auto-archiving projects.
    #[arg(long)]
    pub custom_processing: bool,
}

#[derive(Args)]
pub struct ArchiveArgs {
    #[command(flatten)]
    pub routing: RoutingArgs,
    /// Destination session label.
    #[arg(long)]
    pub label: Option<String>,
    /// Existing archived session to merge into.
    #[arg(long = "dest")]
    pub destination_id: Option<String>,
    /// Merge into an existing destination.
    #[arg(long)]
    pub merge: bool,
    /// Proceed past overridable conflicts.
    #[arg(long = "override")]
    pub override_conflicts: bool,
    /// Proceed although a workflow on the destination is open.
    #[arg(long)]
    pub override_workflow: bool,
    /// Fail instead of creating a missing subject.
    #[arg(long)]
    pub no_subject_create: bool,
    #[arg(long, conflicts_with = "release")]
    pub quarantine: bool,
    /// Archive out of quarantine regardless of the project setting.
    #[arg(long)]
    pub release: bool,
    #[arg(long)]
    pub suppress_triggers: bool,
    #[arg(long)]
    pub justification: Option<String>,
}

impl ArchiveArgs {
    pub fn params(&self) -> ArchiveParams {
        let quarantine = match (self.quarantine, self.release) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        ArchiveParams {
            label: self.label.clone(),
            destination_id: self.destination_id.clone(),
            allow_subject_create: !self.no_subject_create,
            allow_merge: self.merge,
            override_conflicts: self.override_conflicts,
            override_open_workflow: self.override_workflow,
            quarantine,
            suppress_triggers: self.suppress_triggers,
            justification: self.justification.clone(),
            ..ArchiveParams::default()
        }
    }
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Print the built-in defaults instead of the loaded file.
    #[arg(long)]
    pub defaults: bool,
}
