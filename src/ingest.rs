//! Line-oriented batch posting.
//!
//! Each input line is `<client> <content>` for the public feed or
//! `<client> @<recipient> <content>` for a direct message. Every non-blank line
//! produces one JSON result line. A storage failure answers that line with
//! status 500 and processing continues with the next one.

use std::io::Write;

use anyhow::Result;
use chrono::Utc;
use log::{error, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::service::MessageService;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestLine<'a> {
    pub client: &'a str,
    pub recipient: Option<&'a str>,
    pub content: &'a str,
}

/// Parse one line. `None` for blank or client-only lines.
pub fn parse_line(line: &str) -> Option<IngestLine<'_>> {
    let (client, rest) = line.trim().split_once(' ')?;
    Some(match rest.strip_prefix('@').and_then(|r| r.split_once(' ')) {
        Some((recipient, content)) => IngestLine {
            client,
            recipient: Some(recipient),
            content,
        },
        None => IngestLine {
            client,
            recipient: None,
            content: rest,
        },
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub lines: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Process every line from `input`, writing one JSON result per post to `out`.
///
/// Only I/O errors on `input` or `out` end the run.
pub async fn run<R, W>(service: &MessageService, input: R, out: &mut W) -> Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut summary = IngestSummary::default();
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let Some(parsed) = parse_line(&line) else {
            if !line.trim().is_empty() {
                warn!("Skipping malformed ingest line");
                summary.skipped += 1;
            }
            continue;
        };
        summary.lines += 1;
        let now = Utc::now();
        let result = match parsed.recipient {
            Some(recipient) => {
                service
                    .post_to_recipient(parsed.client, recipient, parsed.content, now)
                    .await
            }
            None => service.post_public(parsed.client, parsed.content, now).await,
        };
        let body = match result {
            Ok(outcome) => outcome.to_json(),
            Err(e) => {
                summary.failed += 1;
                error!("Post from client={} failed: {:#}", parsed.client, e);
                serde_json::json!({ "status": 500, "error": "storage failure" })
            }
        };
        writeln!(out, "{}", body)?;
    }
    Ok(summary)
}
