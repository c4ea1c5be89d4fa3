//! Line buffering for `text/event-stream` bodies.

use futures::{Stream, StreamExt};

/// Yields the payload of every `data:` line in `body`, across chunk boundaries.
/// Comments, blank lines and other fields are skipped; `[DONE]` ends the stream.
pub fn data_lines<S, B, E>(body: S) -> impl Stream<Item = anyhow::Result<String>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    futures::stream::unfold(
        (Box::pin(body), Vec::<u8>::with_capacity(8192), false),
        |(mut body, mut buffer, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    match extract_data(&line) {
                        Some("[DONE]") => return None,
                        Some(data) => {
                            let data = data.to_string();
                            return Some((Ok(data), (body, buffer, false)));
                        }
                        None => continue,
                    }
                }

                match body.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(chunk.as_ref()),
                    Some(Err(e)) => {
                        let err = anyhow::anyhow!("Stream error: {}", e);
                        return Some((Err(err), (body, buffer, true)));
                    }
                    None => {
                        // unterminated last line
                        let rest = String::from_utf8_lossy(&buffer).into_owned();
                        buffer.clear();
                        return match extract_data(&rest) {
                            Some("[DONE]") | None => None,
                            Some(data) => Some((Ok(data.to_string()), (body, buffer, true))),
                        };
                    }
                }
            }
        },
    )
}

fn extract_data(line: &str) -> Option<&str> {
    let line = line.trim();
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        None
    } else {
        Some(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(chunks: Vec<&'static str>) -> Vec<String> {
        let body = futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, std::io::Error>(c.as_bytes().to_vec())),
        );
        data_lines(body)
            .map(|item| item.unwrap())
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn joins_lines_split_across_chunks() {
        let lines = collect(vec!["data: {\"a\"", ":1}\n\ndata: {\"b\":2}\r\n", "\n"]).await;
        assert_eq!(lines, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
    }

    #[tokio::test]
    async fn done_marker_ends_the_stream() {
        let lines = collect(vec!["data: one\n\ndata: [DONE]\n\ndata: after\n\n"]).await;
        assert_eq!(lines, vec!["one"]);
    }

    #[tokio::test]
    async fn skips_comments_and_other_fields() {
        let lines = collect(vec![": keep-alive\nevent: message\nid: 7\ndata: x\n"]).await;
        assert_eq!(lines, vec!["x"]);
    }

    #[tokio::test]
    async fn flushes_unterminated_last_line() {
        let lines = collect(vec!["data: first\n", "data: last"]).await;
        assert_eq!(lines, vec!["first", "last"]);
    }

    #[tokio::test]
    async fn body_error_is_reported_once() {
        let body = futures::stream::iter(vec![
            Ok(b"data: ok\n".to_vec()),
            Err(std::io::Error::other("reset")),
        ]);
        let items: Vec<_> = data_lines(body).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "ok");
        assert!(items[1].as_ref().unwrap_err().to_string().contains("reset"));
    }
}
