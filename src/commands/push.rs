//! Push one local branch to its upstream over smart HTTP

use std::{
    fmt,
    io::{BufWriter, IsTerminal, Write},
};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    config::PushConfig,
    error::Error,
    pack::{diff, ObjectId, PackEncoder},
    repository::{ConfigReader, RevisionResolver},
    storage::ObjectStore,
    transport::{self, RefStatus, UpdateCommand},
};

/// Everything a push reads from the local side
pub struct PushContext<'a> {
    pub config: &'a dyn ConfigReader,
    pub resolver: &'a dyn RevisionResolver,
    pub store: &'a dyn ObjectStore,
    pub settings: &'a PushConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefUpdate {
    Created { new: ObjectId },
    Updated { old: ObjectId, new: ObjectId },
    UpToDate { id: ObjectId },
    Rejected { reason: String },
}

/// Outcome for one ref
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSummary {
    /// Local branch name
    pub branch: String,
    /// Remote ref that was updated
    pub ref_name: String,
    pub update: RefUpdate,
}

impl RefSummary {
    pub fn is_rejected(&self) -> bool {
        matches!(self.update, RefUpdate::Rejected { .. })
    }
}

impl fmt::Display for RefSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = self
            .ref_name
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.ref_name);
        match &self.update {
            RefUpdate::Created { .. } => {
                write!(f, " * [new branch]      {} -> {}", self.branch, target)
            }
            RefUpdate::Updated { old, new } => write!(
                f,
                "   {}..{}  {} -> {}",
                old.short(),
                new.short(),
                self.branch,
                target
            ),
            RefUpdate::UpToDate { .. } => {
                write!(f, " = [up to date]      {} -> {}", self.branch, target)
            }
            RefUpdate::Rejected { reason } => write!(
                f,
                " ! [remote rejected] {} -> {} ({})",
                self.branch, target, reason
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSummary {
    /// Remote URL without credentials
    pub url: String,
    pub refs: Vec<RefSummary>,
    /// Objects sent; zero when nothing was posted
    pub objects: u32,
    pub pack_bytes: u64,
}

impl PushSummary {
    pub fn rejected(&self) -> Option<&RefSummary> {
        self.refs.iter().find(|r| r.is_rejected())
    }
}

/// Push `branch` to the ref named by `branch.<branch>.merge` on the remote
/// named by `branch.<branch>.remote`.
pub fn push_branch(ctx: &PushContext<'_>, branch: &str) -> Result<PushSummary> {
    let remote = required(ctx.config, &format!("branch.{}.remote", branch))?;
    let merge = required(ctx.config, &format!("branch.{}.merge", branch))?;
    let url = required(ctx.config, &format!("remote.{}.url", remote))?;

    let mut client = transport::for_url(&url, ctx.settings)?;
    let url = client.url().to_string();
    tracing::info!("Pushing {} to {} on {}", branch, merge, url);

    let remote_id = client
        .discover_refs()?
        .find(&merge)
        .map(|r| r.target)
        .unwrap_or(ObjectId::ZERO);
    let local_id = ctx
        .resolver
        .resolve_to_id(branch)
        .with_context(|| format!("Failed to resolve local branch {}", branch))?;

    let summary = |update, objects, pack_bytes| PushSummary {
        url: url.clone(),
        refs: vec![RefSummary {
            branch: branch.to_string(),
            ref_name: merge.clone(),
            update,
        }],
        objects,
        pack_bytes,
    };

    if local_id == remote_id {
        tracing::info!("{} is up to date at {}", merge, local_id);
        return Ok(summary(RefUpdate::UpToDate { id: local_id }, 0, 0));
    }

    let haves = if remote_id.is_zero() {
        Vec::new()
    } else {
        vec![remote_id]
    };
    let entries = diff(ctx.store, local_id, &haves)
        .with_context(|| format!("Failed to compute objects for {}", merge))?;
    tracing::info!("{} objects to send", entries.len());

    let temp_dir = ctx.settings.temp_dir();
    std::fs::create_dir_all(&temp_dir)
        .with_context(|| format!("Failed to create temp directory: {:?}", temp_dir))?;
    // Removed on drop, whichever way this function returns
    let mut pack_file = tempfile::Builder::new()
        .prefix("push-")
        .suffix(".pack")
        .tempfile_in(&temp_dir)
        .with_context(|| format!("Failed to create pack file in {:?}", temp_dir))?;

    let mut encoder = PackEncoder::new(ctx.store);
    if std::io::stderr().is_terminal() {
        encoder = encoder.with_progress(progress_bar()?);
    }
    let stats = encoder
        .encode(entries, BufWriter::new(pack_file.as_file_mut()))
        .context("Failed to write pack")?;
    tracing::debug!(
        "Wrote pack {:?}: {} objects, {} bytes",
        pack_file.path(),
        stats.objects,
        stats.bytes
    );

    let commands = [UpdateCommand {
        ref_name: merge.clone(),
        old_id: remote_id,
        new_id: local_id,
    }];
    let pack = pack_file.reopen().context("Failed to reopen pack file")?;
    let report = client.send_pack(&commands, pack, stats.bytes)?;

    let update = match report.status_of(&merge) {
        Some(RefStatus::Rejected(reason)) => RefUpdate::Rejected {
            reason: reason.clone(),
        },
        _ if remote_id.is_zero() => RefUpdate::Created { new: local_id },
        _ => RefUpdate::Updated {
            old: remote_id,
            new: local_id,
        },
    };
    Ok(summary(update, stats.objects, stats.bytes))
}

/// Run a push and print git-style status lines to `output`. A rejected ref
/// is returned as [`Error::RemoteRejected`].
pub fn handle<W: Write>(ctx: &PushContext<'_>, branch: &str, output: &mut W) -> Result<()> {
    let summary = push_branch(ctx, branch)?;

    writeln!(output, "To {}", summary.url)?;
    for line in &summary.refs {
        writeln!(output, "{}", line)?;
    }
    output.flush()?;

    if let Some(RefSummary {
        ref_name,
        update: RefUpdate::Rejected { reason },
        ..
    }) = summary.rejected()
    {
        return Err(Error::RemoteRejected {
            ref_name: ref_name.clone(),
            reason: reason.clone(),
        }
        .into());
    }
    Ok(())
}

fn required(config: &dyn ConfigReader, key: &str) -> Result<String> {
    match config.get_config(key)? {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::Config(format!("{} is not set", key)).into()),
    }
}

fn progress_bar() -> Result<ProgressBar> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("  {msg} [{bar:40.cyan/blue}] {pos}/{len} objects ({eta})")
            .context("Invalid progress template")?
            .progress_chars("=>-"),
    );
    bar.set_message("Writing objects");
    Ok(bar)
}
