//! The `migrate` subcommand: legacy `root.json` sessions → v2 layout.

use sc_sessions::{migrate_all_sessions, migrate_session, migrate_session_dry_run, MigrationStats};

use crate::cli::MigrateArgs;
use crate::commands::RunOutcome;

pub fn run(args: MigrateArgs) -> anyhow::Result<RunOutcome> {
    if args.all {
        let results = migrate_all_sessions(&args.path)?;
        if results.is_empty() {
            println!("nothing to migrate under {}", args.path.display());
        }
        for stats in &results {
            report(stats);
        }
        return Ok(RunOutcome::Done);
    }

    let stats = if args.dry_run {
        migrate_session_dry_run(&args.path)?
    } else {
        migrate_session(&args.path)?
    };
    report(&stats);
    if stats.dry_run {
        println!("dry run: originals untouched; preview at {}", stats.session_dir.display());
    } else {
        println!("originals saved under {}/.backup (rollback.sh inside)", stats.session_dir.display());
    }
    Ok(RunOutcome::Done)
}

fn report(stats: &MigrationStats) {
    println!(
        "{}: {} current + {} archived messages, {} usage entries, {} sub-agent(s)",
        stats.session_dir.display(),
        stats.message_count,
        stats.archive_message_count,
        stats.usage_count,
        stats.sub_agents.len(),
    );
}
