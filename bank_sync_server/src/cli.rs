use std::{env, env::VarError};

/// There's no real CLI for the server. Any argument prints the help and the current (non-secret) configuration.
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Be explicit about which envars to print, so as to avoid accidentally exposing secrets
    const DISPLAY_ENVS: [&str; 20] = [
        "RUST_LOG",
        "BSYNC_HOST",
        "BSYNC_PORT",
        "BSYNC_DATABASE_URL",
        "BSYNC_SYNC_INTERVAL_MINS",
        "BSYNC_SYNC_BUDGET_SECS",
        "BSYNC_SYNC_CONCURRENCY",
        "BSYNC_MAX_SYNCS_PER_DAY",
        "BSYNC_EXPIRY_THRESHOLD_DAYS",
        "BSYNC_FAILURE_ESCALATION",
        "BSYNC_AUTHORIZATION_TIMEOUT_MINS",
        "BSYNC_ORDER_CODE_PATTERN",
        "BSYNC_INVOICE_PREFIXES",
        "BSYNC_AUTO_MATCH_MEDIUM",
        "BSYNC_RETRY_ATTEMPTS",
        "BSYNC_HTTP_TIMEOUT_SECS",
        "BSYNC_GOCARDLESS_BASE_URL",
        "BSYNC_ENABLE_BANKING_APP_ID",
        "BSYNC_ENABLE_BANKING_KEY_PATH",
        "BSYNC_ENABLE_BANKING_BASE_URL",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
