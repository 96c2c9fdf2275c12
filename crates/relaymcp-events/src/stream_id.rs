//! Event id parsing (spec §6: `<streamId>|<decimalCounter>`, separator `|`
//! must not appear in stream ids).

use relaymcp_core::{Error, Result};

/// Split an event id into its stream id and monotonic counter.
pub fn parse_event_id(event_id: &str) -> Result<(&str, u64)> {
    let (stream_id, counter_str) = event_id
        .split_once('|')
        .ok_or_else(|| Error::validation(format!("malformed event id: {event_id}")))?;
    let counter = counter_str
        .parse::<u64>()
        .map_err(|_| Error::validation(format!("malformed event id counter: {event_id}")))?;
    Ok((stream_id, counter))
}

pub fn format_event_id(stream_id: &str, counter: u64) -> String {
    format!("{stream_id}|{counter}")
}

/// Validate a stream id is usable as the left side of an event id.
pub fn validate_stream_id(stream_id: &str) -> Result<()> {
    if stream_id.is_empty() {
        return Err(Error::validation("stream id must not be empty"));
    }
    if stream_id.contains('|') {
        return Err(Error::validation(
            "stream id must not contain the '|' event-id separator",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let id = format_event_id("session-1", 42);
        assert_eq!(id, "session-1|42");
        let (stream, counter) = parse_event_id(&id).unwrap();
        assert_eq!(stream, "session-1");
        assert_eq!(counter, 42);
    }

    #[test]
    fn rejects_pipe_in_stream_id() {
        assert!(validate_stream_id("bad|id").is_err());
    }

    #[test]
    fn parse_extracts_stream_id_as_everything_before_first_pipe() {
        // Stream ids themselves can't contain '|', but parsing must still
        // split on the *first* separator, not search for a unique one.
        let (stream, counter) = parse_event_id("abc|123").unwrap();
        assert_eq!(stream, "abc");
        assert_eq!(counter, 123);
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert!(parse_event_id("no-separator").is_err());
        assert!(parse_event_id("stream|not-a-number").is_err());
    }
}
