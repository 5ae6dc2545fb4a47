use std::path::PathBuf;

use clap::{Subcommand, ValueEnum};
use cleanflow_core::batch::ExportKind;
use cleanflow_core::record::RecordFilter;
use cleanflow_core::types::DbId;

#[derive(Subcommand)]
pub enum Commands {
    /// Upload a source file and create a cleaning batch
    Upload {
        /// CSV or spreadsheet to clean
        path: PathBuf,

        #[arg(long, help = "JSON file with per-column cleaning rules (defaults apply when omitted)")]
        rules: Option<PathBuf>,

        #[arg(long, help = "Follow the new batch's progress until it finishes")]
        watch: bool,
    },
    /// Follow a batch's progress until it reaches a terminal status
    Watch { batch_id: DbId },
    Pause { batch_id: DbId },
    Resume { batch_id: DbId },
    /// Ask the server to cancel a batch
    Cancel { batch_id: DbId },
    /// List batches
    Batches,
    /// Show one batch
    Show { batch_id: DbId },
    Rename { batch_id: DbId, name: String },
    /// List a page of a batch's records
    Records {
        batch_id: DbId,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 10)]
        page_size: u32,

        #[arg(long, default_value = "all", help = "all, clean or error")]
        filter: RecordFilter,

        #[arg(long, default_value = "")]
        search: String,
    },
    /// Show a record's version history with per-field diffs
    History { record_id: DbId },
    /// Validate an edit, confirm it, then commit it
    Edit {
        #[arg(long)]
        batch: DbId,

        record_id: DbId,

        /// Field assignments such as `phone=13800000000`
        #[arg(long = "set", value_name = "FIELD=VALUE", required = true)]
        sets: Vec<String>,

        #[arg(long, default_value = "Manual correction")]
        reason: String,

        #[arg(long, short = 'y', help = "Commit without prompting after validation")]
        yes: bool,
    },
    /// Restore a record to the state recorded by a version
    Rollback {
        #[arg(long)]
        batch: DbId,

        record_id: DbId,
        version_id: DbId,
    },
    /// Correct the reason text of a version
    Reason { version_id: DbId, reason: String },
    /// Print the download link for a batch export
    ExportUrl {
        batch_id: DbId,

        #[arg(long, value_enum, default_value_t = ExportArg::All)]
        kind: ExportArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ExportArg {
    All,
    Clean,
    Error,
}

impl From<ExportArg> for ExportKind {
    fn from(arg: ExportArg) -> Self {
        match arg {
            ExportArg::All => ExportKind::All,
            ExportArg::Clean => ExportKind::Clean,
            ExportArg::Error => ExportKind::Error,
        }
    }
}
