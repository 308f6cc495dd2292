use std::io::{BufRead, IsTerminal, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailRecovery {
    Revert,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyDecision {
    Commit,
    Abort,
}

fn stdin_is_tty() -> bool {
    std::io::stdin().is_terminal()
}

fn read_choice(prompt: &str) -> Option<String> {
    print!("{prompt}");
    std::io::stdout().flush().ok()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line).ok()?;
    Some(line.trim().to_lowercase())
}

/// Pause after a failed attempt. Without a TTY the answer is always
/// "continue": an embedded kernel must never block on stdin.
pub fn prompt_fail_recovery() -> FailRecovery {
    if !stdin_is_tty() {
        return FailRecovery::Continue;
    }
    match read_choice(
        "Execution paused after failure. Enter 'r' to revert to the last clean state, \
         or 'c' to continue with the current state: ",
    )
    .as_deref()
    {
        Some("r") | Some("revert") => FailRecovery::Revert,
        Some("c") | Some("continue") => FailRecovery::Continue,
        _ => {
            tracing::info!("Invalid selection, continuing without reverting");
            FailRecovery::Continue
        }
    }
}

/// Gate the commit after successful verification. Without a TTY the
/// answer is always "commit".
pub fn prompt_verify_decision() -> VerifyDecision {
    if !stdin_is_tty() {
        return VerifyDecision::Commit;
    }
    loop {
        match read_choice(
            "Verification successful! Enter 'c' to commit changes, or 'a' to abort: ",
        )
        .as_deref()
        {
            Some("c") => return VerifyDecision::Commit,
            Some("a") => return VerifyDecision::Abort,
            _ => tracing::info!("Invalid selection. Enter 'c' to commit or 'a' to abort."),
        }
    }
}

/// Yes/no confirmation; defaults to yes without a TTY.
pub fn confirm(question: &str) -> bool {
    if !stdin_is_tty() {
        return true;
    }
    matches!(
        read_choice(&format!("{question} [y/n]: ")).as_deref(),
        Some("y") | Some("yes")
    )
}
