use crate::sink::LogSink;
use bytes::Bytes;
use std::sync::Arc;

/// Detects a literal marker in a byte stream that arrives in arbitrary chunks.
///
/// Every chunk is forwarded to the sink unchanged. The carried `offset` is the
/// length of the longest suffix of the data seen so far that is a proper
/// prefix of the marker.
pub struct StreamMatcher {
    pattern: Vec<u8>,
    offset: usize,
    matched: bool,
    sink: Option<Arc<dyn LogSink>>,
}

impl std::fmt::Debug for StreamMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamMatcher")
            .field("pattern", &String::from_utf8_lossy(&self.pattern))
            .field("offset", &self.offset)
            .field("matched", &self.matched)
            .finish()
    }
}

impl StreamMatcher {
    pub fn new(pattern: impl AsRef<[u8]>, sink: Option<Arc<dyn LogSink>>) -> Self {
        let pattern = pattern.as_ref().to_vec();
        Self {
            matched: pattern.is_empty(),
            pattern,
            offset: 0,
            sink,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.matched
    }

    /// Relays `chunk` and scans it. Returns true only on the write that
    /// completes the marker.
    pub fn write(&mut self, chunk: &[u8]) -> bool {
        if let Some(sink) = &self.sink
            && let Err(e) = sink.write(Bytes::copy_from_slice(chunk))
        {
            tracing::debug!("Dropped output chunk: {}", e);
        }

        if self.matched {
            return false;
        }

        let (matched, offset) = scan(chunk, &self.pattern, self.offset);
        self.matched = matched;
        self.offset = offset;
        matched
    }
}

/// Longest `l > 0` such that the last `l` bytes of `s` equal the first `l`
/// bytes of `pattern`, or 0.
fn crossing(s: &[u8], pattern: &[u8]) -> usize {
    let mut l = s.len().min(pattern.len());
    while l > 0 {
        if s[s.len() - l..] == pattern[..l] {
            return l;
        }
        l -= 1;
    }
    0
}

fn scan(s: &[u8], pattern: &[u8], offset: usize) -> (bool, usize) {
    let origin = offset;
    let mut offset = offset;

    while offset > 0 {
        if offset + s.len() < pattern.len() {
            if s == &pattern[offset..offset + s.len()] {
                return (false, offset + s.len());
            }
        } else if s[..pattern.len() - offset] == pattern[offset..] {
            return (true, 0);
        }
        // Fall back to the next shorter border of the carried prefix.
        offset = crossing(&pattern[origin - offset + 1..origin], pattern);
    }

    if contains(s, pattern) {
        return (true, 0);
    }
    (false, crossing(s, pattern))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    fn feed(pattern: &str, chunks: &[&str]) -> (bool, String) {
        let sink = Arc::new(MemorySink::new());
        let mut matcher = StreamMatcher::new(pattern, Some(sink.clone() as Arc<dyn LogSink>));
        for chunk in chunks {
            matcher.write(chunk.as_bytes());
        }
        (matcher.is_matched(), sink.contents())
    }

    #[test]
    fn test_marker_table() {
        let cases: &[(&str, &[&str], bool)] = &[
            ("a", &["a"], true),
            ("a", &["abc"], true),
            ("b", &["abc"], true),
            ("c", &["abc"], true),
            ("d", &["abc"], false),
            ("ab", &["abc"], true),
            ("bc", &["abc"], true),
            ("abc", &["abc"], true),
            ("abcd", &["abc"], false),
            ("b", &["a", "b", "c"], true),
            ("ab", &["a", "b", "c"], true),
            ("ab", &["ab", "c"], true),
            ("ab", &["a", "bc"], true),
            ("abc", &["a", "b", "c"], true),
            ("abc", &["ab", "c"], true),
            ("abc", &["a", "bc"], true),
            ("aabc", &["aa", "abc"], true),
            ("aaabc", &["aa", "abc"], true),
            ("aaabc", &["aaaaaaa", "abc"], true),
            ("aaabc", &["aaaaaaa", "bc"], true),
            ("aaabc", &["aaaaaaa", "aabc"], true),
            ("aaabc", &["aaaaaaa", "aaabc"], true),
            ("aaabc", &["aaaaaaa", "aaa", "bc"], true),
            ("aaabbbc", &["aaaaaaa", "bb", "bc"], true),
            ("aaabbbc", &["aaaaaaa", "bbb", "bc"], false),
            ("aaabbbc", &["aaaaaaa", "bb", "bbc"], false),
            ("aaabbbc", &["aaaaaaa", "aabb", "bbc"], false),
            ("aaabbbc", &["aaaaaab", "bb", "bc"], false),
            ("aaabbbc", &["aaaaaa", "bb", "cc"], false),
            ("aaabbcc", &["aaaaaa", "bb", "cc"], true),
            ("aaabbccdd", &["aaaaaa", "bb", "cc", "dd"], true),
            ("aaabbccdd", &["aaaaaa", "bb", "cc", "ddddd"], true),
            ("aaabbccdd", &["aaaaaabbccddddd"], true),
        ];

        for (pattern, chunks, expected) in cases {
            let (matched, relayed) = feed(pattern, chunks);
            assert_eq!(
                matched, *expected,
                "{:?} match {:?}: expected {}",
                chunks, pattern, expected
            );
            assert_eq!(relayed, chunks.concat(), "relayed bytes for {:?}", chunks);
        }
    }

    #[test]
    fn test_marker_across_boundary() {
        let (matched, relayed) = feed("abc", &["a", "bc"]);
        assert!(matched);
        assert_eq!(relayed, "abc");
    }

    #[test]
    fn test_partial_marker_is_not_a_match() {
        let (matched, _) = feed("abcd", &["abc"]);
        assert!(!matched);
    }

    #[test]
    fn test_bbb_split_reports_no_match() {
        // "aaaaaaabbbbc" does not contain "aaabbbc", so this locks in the
        // answer a contiguous scan gives as well.
        let (matched, relayed) = feed("aaabbbc", &["aaaaaaa", "bbb", "bc"]);
        assert!(!matched);
        assert_eq!(relayed, "aaaaaaabbbbc");
    }

    #[test]
    fn test_every_split_of_a_line_matches() {
        let text = "2024-01-01 INFO server listening on :8080\n";
        let pattern = "listening on";
        for first in 0..text.len() {
            for second in first..text.len() {
                let chunks = [&text[..first], &text[first..second], &text[second..]];
                let (matched, relayed) = feed(pattern, &chunks);
                assert!(matched, "split at {} and {}", first, second);
                assert_eq!(relayed, text);
            }
        }
    }

    #[test]
    fn test_match_reported_once() {
        let mut matcher = StreamMatcher::new("ready", None);
        assert!(!matcher.write(b"booting... re"));
        assert!(matcher.write(b"ady\n"));
        assert!(!matcher.write(b"ready again\n"));
        assert!(matcher.is_matched());
    }

    #[test]
    fn test_empty_marker_is_immediately_matched() {
        let matcher = StreamMatcher::new("", None);
        assert!(matcher.is_matched());
    }
}
