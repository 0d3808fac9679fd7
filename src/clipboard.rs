use anyhow::{Result, anyhow};
use clipboard::{ClipboardContext, ClipboardProvider};

/// Puts `text` on the system clipboard.
pub fn copy(text: &str) -> Result<()> {
    let mut ctx: ClipboardContext =
        ClipboardProvider::new().map_err(|error| anyhow!("clipboard unavailable: {error}"))?;
    ctx.set_contents(text.to_string())
        .map_err(|error| anyhow!("clipboard write failed: {error}"))
}
