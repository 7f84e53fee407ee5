//! Terminal conflict prompt.

use async_trait::async_trait;
use duet_engine::{Arbiter, ConflictInfo, Resolution};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stderr, Stdin};
use tokio::sync::Mutex;

const CHOICES: &str =
    "[l] keep local  [r] keep remote  [L] always local  [R] always remote  [c] cancel\n";

/// Parse one answer line. Single letters are case-sensitive, words are not.
pub fn parse_choice(input: &str) -> Option<Resolution> {
    match input.trim() {
        "l" => Some(Resolution::KeepLocal),
        "r" => Some(Resolution::KeepRemote),
        "L" => Some(Resolution::AlwaysLocal),
        "R" => Some(Resolution::AlwaysRemote),
        "c" | "C" => Some(Resolution::Cancel),
        word => match word.to_ascii_lowercase().as_str() {
            "local" => Some(Resolution::KeepLocal),
            "remote" => Some(Resolution::KeepRemote),
            "always-local" | "always local" => Some(Resolution::AlwaysLocal),
            "always-remote" | "always remote" => Some(Resolution::AlwaysRemote),
            "cancel" => Some(Resolution::Cancel),
            _ => None,
        },
    }
}

/// The conflict as shown to the user.
pub fn render(conflict: &ConflictInfo) -> String {
    let changed = conflict.changed_columns();
    format!(
        "\nConflict in {}: {}\n  local modified:  {}\n  remote modified: {}\n  differing:       {}\n",
        conflict.table,
        conflict.description,
        conflict.local_modified,
        conflict.remote_modified,
        if changed.is_empty() {
            "-".to_string()
        } else {
            changed.join(", ")
        }
    )
}

/// Asks the user about each conflict over a line-oriented reader and writer.
///
/// End of input counts as cancel, as does a failed write.
pub struct TerminalArbiter<R, W> {
    io: Mutex<(R, W)>,
}

impl TerminalArbiter<BufReader<Stdin>, Stderr> {
    /// Prompt on stderr so stdout stays clean for reports.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stderr())
    }
}

impl<R, W> TerminalArbiter<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }

    pub fn into_inner(self) -> (R, W) {
        self.io.into_inner()
    }

    async fn ask(reader: &mut R, writer: &mut W, conflict: &ConflictInfo) -> io::Result<Resolution> {
        writer.write_all(render(conflict).as_bytes()).await?;

        loop {
            writer.write_all(CHOICES.as_bytes()).await?;
            writer.write_all(b"> ").await?;
            writer.flush().await?;

            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(Resolution::Cancel);
            }
            match parse_choice(&line) {
                Some(resolution) => return Ok(resolution),
                None => {
                    writer
                        .write_all(format!("Unrecognised choice '{}'\n", line.trim()).as_bytes())
                        .await?;
                }
            }
        }
    }
}

#[async_trait]
impl<R, W> Arbiter for TerminalArbiter<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn resolve(&self, conflict: &ConflictInfo) -> Resolution {
        let mut io = self.io.lock().await;
        let (reader, writer) = &mut *io;

        match Self::ask(reader, writer, conflict).await {
            Ok(resolution) => {
                tracing::debug!(table = %conflict.table, stable_id = %conflict.stable_id, ?resolution, "conflict answered");
                resolution
            }
            Err(err) => {
                tracing::warn!(error = %err, "conflict prompt failed, cancelling");
                Resolution::Cancel
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_engine::Row;

    fn conflict() -> ConflictInfo {
        ConflictInfo {
            table: "decks".into(),
            stable_id: "d1".into(),
            local_modified: "2024-03-02T00:00:00".into(),
            remote_modified: "2024-03-03T00:00:00".into(),
            local: Row::new().with("name", "Verbs"),
            remote: Row::new().with("name", "Verbos"),
            description: "Deck: Verbs".into(),
        }
    }

    fn scripted(input: &'static str) -> TerminalArbiter<&'static [u8], Vec<u8>> {
        TerminalArbiter::new(input.as_bytes(), Vec::new())
    }

    #[test]
    fn parses_letters_and_words() {
        assert_eq!(parse_choice("l\n"), Some(Resolution::KeepLocal));
        assert_eq!(parse_choice(" r "), Some(Resolution::KeepRemote));
        assert_eq!(parse_choice("L"), Some(Resolution::AlwaysLocal));
        assert_eq!(parse_choice("R"), Some(Resolution::AlwaysRemote));
        assert_eq!(parse_choice("c"), Some(Resolution::Cancel));
        assert_eq!(parse_choice("Remote"), Some(Resolution::KeepRemote));
        assert_eq!(parse_choice("always-local"), Some(Resolution::AlwaysLocal));
        assert_eq!(parse_choice("CANCEL"), Some(Resolution::Cancel));
        assert_eq!(parse_choice(""), None);
        assert_eq!(parse_choice("x"), None);
    }

    #[test]
    fn render_shows_both_sides() {
        let text = render(&conflict());
        assert!(text.contains("Conflict in decks: Deck: Verbs"));
        assert!(text.contains("2024-03-02T00:00:00"));
        assert!(text.contains("2024-03-03T00:00:00"));
        assert!(text.contains("differing:       name"));
    }

    #[tokio::test]
    async fn reprompts_until_valid() {
        let arbiter = scripted("maybe\n\nR\n");
        assert_eq!(arbiter.resolve(&conflict()).await, Resolution::AlwaysRemote);

        let (_, output) = arbiter.into_inner();
        let output = String::from_utf8(output).unwrap();
        assert_eq!(output.matches("> ").count(), 3);
        assert!(output.contains("Unrecognised choice 'maybe'"));
    }

    #[tokio::test]
    async fn end_of_input_cancels() {
        let arbiter = scripted("");
        assert_eq!(arbiter.resolve(&conflict()).await, Resolution::Cancel);
    }

    #[tokio::test]
    async fn answers_are_consumed_in_order() {
        let arbiter = scripted("l\nr\n");
        assert_eq!(arbiter.resolve(&conflict()).await, Resolution::KeepLocal);
        assert_eq!(arbiter.resolve(&conflict()).await, Resolution::KeepRemote);
        assert_eq!(arbiter.resolve(&conflict()).await, Resolution::Cancel);
    }
}
