//! ICMP latency probing with the system `ping` binary.

use serde::Serialize;

/// One parsed echo reply.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PingRecord {
    /// Seconds since the Unix epoch as printed by `ping -D`.
    pub timestamp: f64,
    pub bytes: u32,
    pub sequence: u32,
    pub ttl: u32,
    pub time_ms: f64,
}

/// `ping -D -4 -c <count> <target>`.
pub fn ping_args(target: &str, count: usize) -> Vec<String> {
    vec![
        "-D".to_string(),
        "-4".to_string(),
        "-c".to_string(),
        count.to_string(),
        target.to_string(),
    ]
}

/// Per-reply lines of a ping transcript: everything after the `PING` header
/// and before the blank line that precedes the statistics block.
pub fn reply_lines(output: &str) -> Vec<&str> {
    output
        .lines()
        .skip(1)
        .take_while(|line| !line.trim().is_empty() && !line.starts_with("---"))
        .collect()
}

/// Parse a reply line such as
/// `[1763335364.615064] 64 bytes from 169.254.63.82: icmp_seq=1 ttl=63 time=4.25 ms`.
pub fn parse_ping_line(line: &str) -> Option<PingRecord> {
    let open = line.find('[')?;
    let close = open + line[open..].find(']')?;
    let stamp = &line[open + 1..close];
    if !stamp.contains('.') {
        return None;
    }
    let timestamp = stamp.parse::<f64>().ok()?;

    let rest = &line[close + 1..];
    let bytes_at = rest.find(" bytes")?;
    let bytes = trailing_digits(&rest[..bytes_at])?.parse().ok()?;

    let rest = &rest[bytes_at..];
    let sequence = value_after(rest, "icmp_seq=")?.parse().ok()?;
    let ttl = value_after(rest, "ttl=")?.parse().ok()?;
    let time_ms = value_after(rest, "time=")?.parse().ok()?;

    Some(PingRecord {
        timestamp,
        bytes,
        sequence,
        ttl,
        time_ms,
    })
}

fn trailing_digits(s: &str) -> Option<&str> {
    let start = s
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    Some(&s[start..])
}

fn value_after<'a>(s: &'a str, key: &str) -> Option<&'a str> {
    let start = s.find(key)? + key.len();
    let tail = &s[start..];
    let end = tail
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(tail.len());
    if end == 0 {
        return None;
    }
    Some(&tail[..end])
}
