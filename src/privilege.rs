// SPDX-License-Identifier: PMPL-1.0-or-later

//! Root check for commands that touch traffic rules.

use anyhow::{anyhow, Result};

pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

pub fn require_root(action: &str) -> Result<()> {
    if is_root() {
        Ok(())
    } else {
        Err(anyhow!("{} requires root privileges (try sudo)", action))
    }
}
