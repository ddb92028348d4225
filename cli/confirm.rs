use anyhow::{Context, Result};
use log;
use std::io::{BufRead, Write};

const PROMPT: &str = "Proceed? [y/n] ";

/// Asks until the answer is `y` or `n` (any case). End of input counts as `n`.
pub fn confirm<R: BufRead, W: Write>(mut input: R, mut output: W) -> Result<bool> {
    let mut line = String::new();
    loop {
        output
            .write_all(PROMPT.as_bytes())
            .and_then(|_| output.flush())
            .context("Failed to write confirmation prompt")?;

        line.clear();
        let read = input
            .read_line(&mut line)
            .context("Failed to read confirmation answer")?;
        if read == 0 {
            log::debug!("Confirmation input closed; treating as 'n'.");
            writeln!(output).context("Failed to write confirmation prompt")?;
            return Ok(false);
        }

        match line.trim().to_ascii_lowercase().as_str() {
            "y" => return Ok(true),
            "n" => return Ok(false),
            other => log::trace!("Unrecognised confirmation answer {:?}", other),
        }
    }
}
