// Unix socket command server.
//
// Commands arrive newline- or NUL-delimited, one response per command,
// each response NUL-terminated. Every connection runs in its own task,
// a slow client never blocks another.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;

/// Binds the control socket, replacing a stale file from a previous run.
/// Must be called from within the runtime.
pub fn bind(path: &Path) -> io::Result<UnixListener> {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("removed stale socket file {}", path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }

    let listener = UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))?;
    info!("listening on {}", path.display());
    Ok(listener)
}

pub async fn run(listener: UnixListener, dispatcher: Dispatcher) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_connection(stream, dispatcher).await {
                        warn!("client connection error: {}", err);
                    }
                });
            }
            Err(err) => {
                warn!("accept failed: {}", err);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn serve_connection(stream: UnixStream, dispatcher: Dispatcher) -> io::Result<()> {
    info!("client connected");
    let (mut read, mut write) = stream.into_split();
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = read.read(&mut chunk).await?;
        if n == 0 {
            // EOF may carry one last unterminated command.
            if !pending.iter().all(u8::is_ascii_whitespace) {
                respond(&mut write, &dispatcher, &pending).await?;
            }
            break;
        }
        pending.extend_from_slice(&chunk[..n]);
        while let Some(pos) = pending.iter().position(|b| *b == b'\n' || *b == 0) {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            respond(&mut write, &dispatcher, &line[..line.len() - 1]).await?;
        }
    }
    info!("client disconnected");
    Ok(())
}

async fn respond(
    write: &mut OwnedWriteHalf,
    dispatcher: &Dispatcher,
    raw: &[u8],
) -> io::Result<()> {
    let line = String::from_utf8_lossy(raw);
    let command = line.trim();
    info!("command: {}", command);
    let response = dispatcher.handle(command).await;
    debug!("send: {}", response);
    write.write_all(response.as_bytes()).await?;
    write.write_all(b"\0").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{StateMachine, Transients};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;

    async fn connect(path: &std::path::Path) -> UnixStream {
        for _ in 0..100 {
            if let Ok(stream) = UnixStream::connect(path).await {
                return stream;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server never came up on {}", path.display());
    }

    async fn read_response(stream: &mut UnixStream) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            stream.read_exact(&mut byte).await.unwrap();
            if byte[0] == 0 {
                break;
            }
            buf.push(byte[0]);
        }
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn serves_both_framings_on_one_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("led.sock");
        // stale file from a previous run
        std::fs::write(&path, b"junk").unwrap();

        let machine = StateMachine::new(28.0, 255, Transients::default());
        let dispatcher = Dispatcher::new(Arc::new(Mutex::new(machine)));
        let listener = bind(&path).unwrap();
        let server = tokio::spawn(run(listener, dispatcher));

        let mut stream = connect(&path).await;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o666);

        stream.write_all(b"PrintStarted\n").await.unwrap();
        assert_eq!(
            read_response(&mut stream).await,
            "OK PrintStarted   # listening -> PrintStarted"
        );

        stream.write_all(b"progress:40\0").await.unwrap();
        assert_eq!(
            read_response(&mut stream).await,
            "OK Progress:40   # PrintStarted -> Progress:40"
        );

        server.abort();
    }

    #[tokio::test]
    async fn unterminated_command_is_served_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("led.sock");
        let machine = StateMachine::new(28.0, 255, Transients::default());
        let dispatcher = Dispatcher::new(Arc::new(Mutex::new(machine)));
        let listener = bind(&path).unwrap();
        let server = tokio::spawn(run(listener, dispatcher));

        let mut stream = connect(&path).await;
        stream.write_all(b"ReadyToPrint").await.unwrap();
        stream.shutdown().await.unwrap();
        assert_eq!(
            read_response(&mut stream).await,
            "OK ReadyToPrint   # listening -> ReadyToPrint"
        );

        server.abort();
    }
}
