//! Outbound message sources.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use crate::types::Result;

/// Producer of outbound payloads, read one at a time in order.
#[async_trait]
pub trait OutboundSource: Send {
    /// Next payload, or `None` once the source is exhausted.
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Reads one payload per line. Surrounding whitespace is trimmed and empty
/// lines are skipped.
pub struct LineSource<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin + Send> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> OutboundSource for LineSource<R> {
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        while let Some(line) = self.lines.next_line().await? {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.as_bytes().to_vec()));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(input: &'static [u8]) -> Vec<String> {
        let mut source = LineSource::new(input);
        let mut out = Vec::new();
        while let Some(msg) = source.next_message().await.unwrap() {
            out.push(String::from_utf8(msg).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn yields_lines_in_order() {
        assert_eq!(collect(b"a\nb\nc\n").await, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn skips_empty_and_blank_lines() {
        assert_eq!(collect(b"a\n\n   \nb\r\n").await, ["a", "b"]);
    }

    #[tokio::test]
    async fn trims_whitespace_and_handles_missing_newline() {
        assert_eq!(collect(b"  hello world \n tail").await, ["hello world", "tail"]);
    }

    #[tokio::test]
    async fn empty_input_is_exhausted() {
        assert!(collect(b"").await.is_empty());
    }
}
