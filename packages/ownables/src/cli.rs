//! Offline tooling behind the `ownables` binary.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use ownables_anchoring::{verify, AnchorStatus, HttpLedger};
use ownables_event_chain::{EventChain, Hash};
use ownables_state_store::ChainRecord;

use crate::error::{Error, Result};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the content id of a package directory
    Cid { dir: PathBuf },

    /// Verify a chain file
    Verify {
        chain: PathBuf,

        /// Also check the chain's anchors on this ledger
        #[arg(long)]
        ledger: Option<String>,
    },

    /// Print the anchors of a chain file
    Anchors {
        chain: PathBuf,

        /// Only anchors for events after this hash
        #[arg(long)]
        after: Option<String>,
    },

    /// Print a chain file's events
    Show { chain: PathBuf },
}

/// Run `command` and return its output.
pub async fn run(command: Command) -> Result<String> {
    match command {
        Command::Cid { dir } => {
            let files = ownables_content_id::read_dir(&dir).map_err(crate::PackageError::from)?;
            Ok(ownables_content_id::compute_content_id(&files).map_err(crate::PackageError::from)?)
        }
        Command::Verify { chain, ledger } => {
            let chain = read_chain(&chain)?;
            if chain.is_partial() {
                chain.validate_links()?;
            } else {
                chain.validate()?;
            }
            let mut out = format!("ok: {} events, latest {}", chain.len(), chain.latest_hash());

            if let Some(url) = ledger {
                let ledger = HttpLedger::new(&url)?;
                for result in verify(&ledger, &chain.anchor_map()).await {
                    let status = match result.status {
                        AnchorStatus::Verified => "verified".to_string(),
                        AnchorStatus::Mismatch { found } => format!("mismatch (ledger has {})", found),
                        AnchorStatus::NotFound => "not found".to_string(),
                        AnchorStatus::Unreachable => "unreachable".to_string(),
                    };
                    out.push_str(&format!("\n{}: {}", result.anchor, status));
                }
            }
            Ok(out)
        }
        Command::Anchors { chain, after } => {
            let mut chain = read_chain(&chain)?;
            if let Some(after) = after {
                let hash: Hash = after.parse()?;
                chain = chain.starting_after(&hash);
            }
            let anchors = chain.anchor_map();
            Ok(serde_json::to_string_pretty(&anchors).map_err(ownables_event_chain::ChainError::from)?)
        }
        Command::Show { chain } => Ok(describe(&read_chain(&chain)?)),
    }
}

/// Read a chain from an event chain or chain record file.
fn read_chain(path: &Path) -> Result<EventChain> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidMessage(format!("{}: {}", path.display(), e)))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| Error::InvalidMessage(format!("{}: {}", path.display(), e)))?;

    if value.get("chain").is_some() {
        Ok(ChainRecord::from_json(&text)?.chain)
    } else {
        Ok(EventChain::from_value(value)?)
    }
}

fn describe(chain: &EventChain) -> String {
    let mut out = format!(
        "id:      {}\nevents:  {}{}\nstate:   {}\nlatest:  {}\n",
        chain.id(),
        chain.len(),
        if chain.is_partial() { " (partial)" } else { "" },
        chain.state(),
        chain.latest_hash(),
    );
    for (i, event) in chain.events().iter().enumerate() {
        let hash = event.hash.map(|h| h.to_hex()).unwrap_or_else(|| "-".to_string());
        let signer = event.signer().map(|k| k.to_hex()).unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "\n#{} {}\n  context: {}\n  time:    {}\n  signer:  {}",
            i,
            hash,
            event.context().as_deref().unwrap_or(&event.media_type),
            format_timestamp(event.timestamp),
            signer,
        ));
    }
    out
}

fn format_timestamp(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| millis.to_string())
}
