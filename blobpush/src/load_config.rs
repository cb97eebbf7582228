/// `load_config` module: turns CLI arguments plus the working directory into a
/// fully resolved [`RunConfig`].
///
/// This is the only place where user input is read and mapped onto the
/// strongly-typed values the core crate works with.
///
/// # Responsibilities
/// - Read `settings.json` from the working directory (required)
/// - Resolve account credentials: flag, then environment, then settings file
/// - Split `--container-name` into container and virtual-folder prefix
/// - Read `.blobpushignore` and append any `--ignore` patterns
/// - Decide where the upload ledger lives
///
/// # Errors
/// Every failure is a configuration or argument error, reported through
/// `anyhow` with the underlying [`UploadError`] as its root cause.
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};

use blobpush_core::config::{
    AccountCredentials, Destination, Settings, UploadOptions, SETTINGS_FILE_NAME,
};
use blobpush_core::ignore::IgnoreRules;
use blobpush_core::ledger::Ledger;
use blobpush_core::planner::PlanRequest;
use blobpush_core::UploadError;

use crate::cli::UploadArgs;

/// Directory (relative to the working directory) holding ledgers and log files.
pub const LOG_DIR: &str = "logs";

/// Everything one upload run needs, resolved up front.
#[derive(Debug)]
pub struct RunConfig {
    pub settings: Settings,
    pub credentials: AccountCredentials,
    pub destination: Destination,
    pub ignore: IgnoreRules,
    pub ledger_path: PathBuf,
    pub plan: PlanRequest,
    pub options: UploadOptions,
}

/// Reads `settings.json` from `dir`. A missing or malformed file is a configuration error.
pub fn load_settings<P: AsRef<Path>>(dir: P) -> Result<Settings> {
    let path = dir.as_ref().join(SETTINGS_FILE_NAME);
    info!(settings_path = %path.display(), "Loading settings from file");

    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            error!(settings_path = %path.display(), "Settings file not found");
            return Err(UploadError::Configuration(format!(
                "missing settings file {}",
                path.display()
            ))
            .into());
        }
        Err(e) => {
            error!(error = ?e, settings_path = %path.display(), "Failed to read settings file");
            return Err(UploadError::io(path, e).into());
        }
    };

    Settings::from_json(&content).map_err(|e| {
        error!(error = %e, settings_path = %path.display(), "Failed to parse settings file");
        e.into()
    })
}

/// Resolves the full run configuration for `args`, reading files from `working_dir`.
pub fn load_config(args: &UploadArgs, working_dir: &Path) -> Result<RunConfig> {
    let settings = load_settings(working_dir)?;
    let credentials = AccountCredentials::resolve(
        args.account_name.clone(),
        args.account_key.clone(),
        &settings,
    )?;
    let destination = Destination::parse(&args.container_name)?;

    let mut ignore = IgnoreRules::load(working_dir)?;
    if !args.ignore.is_empty() {
        ignore.extend(IgnoreRules::from_patterns(args.ignore.iter().cloned()));
    }

    let ledger_path = Ledger::path_for(
        &working_dir.join(LOG_DIR),
        &credentials.name,
        &args.container_name,
    );

    let plan = PlanRequest {
        root: args.path.clone(),
        cut_prefix: args.cut_path.clone(),
        destination_prefix: destination.prefix.clone(),
        recurse: args.recurse,
    };
    let options = UploadOptions {
        container: destination.container.clone(),
        concurrency: args.concurrency,
        force: args.force,
        continue_on_failure: args.continue_on_failure,
        sleep: Duration::from_millis(args.sleep),
    };

    info!(
        account = %credentials.name,
        container = %destination.container,
        prefix = %destination.prefix,
        ignore_rules = ignore.len(),
        ledger = %ledger_path.display(),
        "Resolved run configuration"
    );

    Ok(RunConfig {
        settings,
        credentials,
        destination,
        ignore,
        ledger_path,
        plan,
        options,
    })
}
