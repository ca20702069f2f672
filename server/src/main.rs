use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use sockcred_common::{config, logging};
use sockcred_server::{Admission, AuthorityPolicy, CredentialAuthority, Verdict};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sockcred-server")]
#[command(about = "Credential authority for Unix socket clients")]
struct Args {
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Socket to listen on (defaults to $SOCKCRED_SOCKET_DIR/sockcred.sock)
    #[arg(short, long)]
    socket_path: Option<PathBuf>,

    /// Print every admission as a JSON line on stdout
    #[arg(long)]
    json: bool,

    /// Handle a single connection and exit; fails if the client is rejected
    #[arg(long)]
    once: bool,
}

fn print_admission(admission: &Admission, json: bool) {
    if json {
        match serde_json::to_string(admission) {
            Ok(line) => println!("{line}"),
            Err(e) => error!("Failed to serialize admission: {}", e),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logging(&args.log_level);

    let socket_path = args.socket_path.unwrap_or_else(config::socket_path);
    let policy = AuthorityPolicy::from_env().context("Failed to load admission policy")?;
    info!(
        "Admission policy: uids {:?}, gids {:?}, enforced: {}",
        policy.allowed_uids(),
        policy.allowed_gids(),
        policy.is_enforced()
    );

    let authority = CredentialAuthority::new(socket_path, policy).with_io_timeout(config::io_timeout());
    let listener = authority.bind()?;

    if args.once {
        let admission = authority.accept_one(&listener);
        authority.shutdown()?;
        let admission = admission?;
        print_admission(&admission, args.json);
        if let Verdict::Rejected(reason) = admission.verdict {
            bail!("Client rejected: {}", reason);
        }
        return Ok(());
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, stopping authority...");
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    info!("Press Ctrl+C to stop the authority");
    authority.run_with_shutdown(&listener, running, |admission| {
        print_admission(admission, args.json)
    })?;

    authority.shutdown()?;
    info!("✓ Authority shutdown completed");
    Ok(())
}
