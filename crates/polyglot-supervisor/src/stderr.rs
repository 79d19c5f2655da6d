//! Forwards a child's stderr, line by line, into `tracing` events at the
//! level its `**LEVEL:` prefix names. Unrecognized or missing prefixes log
//! at error.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, error, info, warn};

use polyglot_core::logging::classify_stderr_prefix;

/// Read one line as raw bytes and decode it lossily rather than via
/// `AsyncBufReadExt::lines()`, whose `String`-returning `next_line` treats
/// non-UTF-8 bytes as a hard read error and would end stderr forwarding for
/// the rest of the child's life the first time it wrote a non-UTF-8 byte.
async fn next_lossy_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> std::io::Result<Option<String>> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    while buf.last() == Some(&b'\n') || buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

pub fn spawn<R>(base_key: String, stderr: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        loop {
            match next_lossy_line(&mut reader).await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match classify_stderr_prefix(&line) {
                        tracing::Level::INFO => info!(server = %base_key, "{line}"),
                        tracing::Level::DEBUG => debug!(server = %base_key, "{line}"),
                        tracing::Level::WARN => warn!(server = %base_key, "{line}"),
                        _ => error!(server = %base_key, "{line}"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("error reading stderr for {base_key}: {e}");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_utf8_bytes_do_not_end_the_stream() {
        let (mut writer, reader) = tokio::io::duplex(4096);
        use tokio::io::AsyncWriteExt;
        writer.write_all(b"**INFO: before\n").await.unwrap();
        writer.write_all(&[0xff, 0xfe, b'\n']).await.unwrap();
        writer.write_all(b"**INFO: after\n").await.unwrap();
        drop(writer);

        let mut buf_reader = BufReader::new(reader);
        let first = next_lossy_line(&mut buf_reader).await.unwrap().unwrap();
        assert_eq!(first, "**INFO: before");
        let second = next_lossy_line(&mut buf_reader).await.unwrap().unwrap();
        assert!(second.contains('\u{fffd}'));
        let third = next_lossy_line(&mut buf_reader).await.unwrap().unwrap();
        assert_eq!(third, "**INFO: after");
    }
}
