//! Interactive auth-key entry

use async_trait::async_trait;
use gamelink_auth::KeySource;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Prompts the operator on the console for the auth key the broker printed,
/// once per (re)connection attempt.
pub struct ConsoleKeySource;

#[async_trait]
impl KeySource for ConsoleKeySource {
    async fn key(&mut self) -> std::io::Result<String> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(b"Enter auth key: ").await?;
        stdout.flush().await?;

        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        reader.read_line(&mut line).await?;
        if line.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "console input closed",
            ));
        }
        Ok(line)
    }
}
