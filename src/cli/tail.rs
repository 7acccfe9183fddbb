use crate::client::TailClient;
use crate::ingest::TailFormat;
use futures::StreamExt;
use std::io::Write;
use tokio::signal;
use tracing::info;

/// Print every line the server publishes until it hangs up or Ctrl+C.
pub async fn tail(url: &str, api_key: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let format = if json { TailFormat::Json } else { TailFormat::Raw };
    let client = TailClient::new(url, api_key)?;

    let lines = client.lines(format).await?;
    futures::pin_mut!(lines);
    info!(url = url, "Tailing logs");

    let stdout = std::io::stdout();
    loop {
        tokio::select! {
            next = lines.next() => match next {
                Some(Ok(line)) => {
                    let mut out = stdout.lock();
                    writeln!(out, "{}", line)?;
                    out.flush()?;
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    info!("Server closed the tail");
                    return Ok(());
                }
            },
            _ = signal::ctrl_c() => return Ok(()),
        }
    }
}
