//! WS source manager: for WS-sourced tasks, opens a second connection to
//! `{source_uri}/receive-clear-cache` and forwards binary chunks into the
//! transcoder subprocess's stdin. RTMP sources need none of this — ffmpeg
//! pulls `rtmp://` URIs natively via `-i`, so only the WS path runs a
//! custom client, mirroring the reader/heartbeat/reconnect shape of
//! `control_client.rs` but with no request/response correlation and no
//! reconnect (a dropped source socket ends the task).

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;

const READ_TIMEOUT: Duration = Duration::from_secs(60);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(20);

/// Dials the source and streams binary chunks into `stdin` until the
/// socket closes or a read stalls past `READ_TIMEOUT`. Returns once the
/// source is exhausted; the caller is expected to finalize the task
/// afterward (the transcoder sees EOF on its stdin and exits on its own).
pub async fn run(source_uri: &str, stdin: std::sync::Arc<Mutex<ChildStdin>>) -> anyhow::Result<()> {
    let url = format!("{}/receive-clear-cache", source_uri.trim_end_matches('/'));
    let (ws, _) = tokio_tungstenite::connect_async(&url).await?;
    let (mut sink, mut stream) = ws.split();

    let heartbeat = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_PERIOD);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if sink.send(Message::Text("h".into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        let next = tokio::time::timeout(READ_TIMEOUT, stream.next()).await;
        let msg = match next {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                heartbeat.abort();
                return Err(e.into());
            }
            Ok(None) => break,
            Err(_) => {
                heartbeat.abort();
                anyhow::bail!("source connection read timed out");
            }
        };

        match msg {
            Message::Binary(data) => {
                let mut guard = stdin.lock().await;
                if guard.write_all(&data).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => continue,
        }
    }

    heartbeat.abort();
    Ok(())
}
