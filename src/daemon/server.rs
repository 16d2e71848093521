//! Daemon server: Unix socket server that handles CLI requests.

use anyhow::{bail, Result};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader as AsyncBufReader};
use tokio::net::UnixListener;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::indexer::{self, IndexHandle};

use super::protocol::{Request, Response};

/// Run the daemon in the foreground until Ctrl-C or a `shutdown` request.
pub async fn run_daemon(config: Config) -> Result<()> {
    let sock_path = config.socket_path();
    let pid_file = config.pid_path();

    for dir in [sock_path.parent(), pid_file.parent()].into_iter().flatten() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }

    if is_daemon_running(&pid_file) {
        bail!("daemon already running (pid file {})", pid_file.display());
    }

    // Remove stale socket if exists
    if sock_path.exists() {
        std::fs::remove_file(&sock_path)?;
    }

    let (handle, join) = indexer::start(&config)?;

    let listener = UnixListener::bind(&sock_path)?;
    std::fs::write(&pid_file, std::process::id().to_string())?;
    info!(socket = %sock_path.display(), "daemon listening");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = handle.stopped() => break,
            _ = &mut ctrl_c, if !interrupted => {
                info!("interrupted, shutting down");
                interrupted = true;
                handle.shutdown().await;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let handle = handle.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, &handle).await {
                            debug!(error = %e, "client handler error");
                        }
                    });
                }
                Err(e) => error!(error = %e, "accept error"),
            },
        }
    }

    info!("daemon shutting down");
    let result = join.await;
    let _ = std::fs::remove_file(&sock_path);
    let _ = std::fs::remove_file(&pid_file);

    result??;
    Ok(())
}

/// Handle a single client connection: one request line, one response line.
async fn handle_client(stream: tokio::net::UnixStream, handle: &IndexHandle) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = AsyncBufReader::new(reader);

    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response = match serde_json::from_str::<Request>(&line) {
        Ok(request) => {
            debug!(?request, "received request");
            handle.request(request).await?
        }
        Err(e) => Response::error(format!("malformed request: {}", e)),
    };

    let mut response_json = serde_json::to_string(&response)?;
    response_json.push('\n');
    writer.write_all(response_json.as_bytes()).await?;
    writer.flush().await?;

    Ok(())
}

/// Check if daemon is running by checking PID file and process.
pub fn is_daemon_running(pid_file: &Path) -> bool {
    if !pid_file.exists() {
        return false;
    }

    // Read PID and check if process is alive
    if let Ok(pid_str) = std::fs::read_to_string(pid_file) {
        if let Ok(pid) = pid_str.trim().parse::<i32>() {
            // Check if process exists (signal 0 = check existence)
            unsafe {
                return libc::kill(pid, 0) == 0;
            }
        }
    }

    false
}

/// Send a request to the daemon and get a response.
pub fn send_request(sock_path: &Path, request: &Request) -> Result<Response> {
    let mut stream = UnixStream::connect(sock_path)?;

    let request_json = serde_json::to_string(request)?;
    writeln!(stream, "{}", request_json)?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: Response = serde_json::from_str(&response_line)?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_or_garbage_pid_file() {
        let dir = tempdir().unwrap();
        let pid = dir.path().join("daemon.pid");
        assert!(!is_daemon_running(&pid));
        std::fs::write(&pid, "not a pid").unwrap();
        assert!(!is_daemon_running(&pid));
    }

    #[test]
    fn test_own_pid_is_running() {
        let dir = tempdir().unwrap();
        let pid = dir.path().join("daemon.pid");
        std::fs::write(&pid, std::process::id().to_string()).unwrap();
        assert!(is_daemon_running(&pid));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serves_requests_until_shutdown() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("proj");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("main.c"), "int main(void) { return 0; }\n").unwrap();

        let config = Config {
            roots: vec![root.clone()],
            workers: 1,
            watch: false,
            ..Config::default()
        };
        let sock = config.socket_path();
        let daemon = tokio::spawn(run_daemon(config));

        for _ in 0..200 {
            if sock.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let ping = {
            let sock = sock.clone();
            tokio::task::spawn_blocking(move || send_request(&sock, &Request::Ping))
                .await
                .unwrap()
                .unwrap()
        };
        assert!(matches!(ping, Response::Pong));

        let bye = {
            let sock = sock.clone();
            tokio::task::spawn_blocking(move || send_request(&sock, &Request::Shutdown))
                .await
                .unwrap()
                .unwrap()
        };
        assert!(matches!(bye, Response::Goodbye));

        daemon.await.unwrap().unwrap();
        assert!(!sock.exists());
        assert!(!root.join(".cnav/daemon.pid").exists());
    }
}
