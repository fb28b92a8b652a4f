use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 8 * 1024;

/// Bytes kept from one output stream plus a count of what was dropped.
#[derive(Debug, Default)]
pub(crate) struct Captured {
    pub bytes: Vec<u8>,
    pub omitted: u64,
}

impl Captured {
    pub fn truncated(&self) -> bool {
        self.omitted > 0
    }

    pub fn into_text(self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.omitted > 0 {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("[output truncated: {} bytes omitted]\n", self.omitted));
        }
        text
    }
}

/// Reads `reader` to EOF, storing at most `limit` bytes. The rest is drained and
/// counted so the writer never blocks on a full pipe.
pub(crate) async fn read_capped<R>(mut reader: R, limit: usize) -> std::io::Result<Captured>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Captured::default();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        let room = limit.saturating_sub(captured.bytes.len());
        let keep = room.min(read);
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.omitted += (read - keep) as u64;
    }
    Ok(captured)
}
