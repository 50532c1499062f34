// Timed lyric parsing and lookup
//
// Line-oriented LRC-style format: each line carries zero or more `[mm:ss]`
// or `[mm:ss.xx]` time tags followed by text, plus an optional global
// `[offset:±N]` directive. Lyric absence is a normal, silent condition —
// nothing in here ever returns an error.

use std::io::Read;

use crate::catalog::MediaCatalog;
use crate::track::Locator;

/// A single timed cue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricLine {
    pub time_ms: i64,
    pub text: String,
}

/// A parsed lyric sheet: cues sorted ascending by time, plus a global
/// offset applied uniformly at lookup.
#[derive(Debug, Clone, Default)]
pub struct LyricTrack {
    lines: Vec<LyricLine>,
    offset_ms: i64,
}

impl LyricTrack {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse lyric text. Lines without time tags, and tagged lines whose
    /// stripped text is empty, are dropped. A line with several time tags
    /// yields one cue per tag, all sharing the line's text.
    pub fn parse(text: &str) -> Self {
        let mut lines = Vec::new();
        let mut offset_ms = 0i64;

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            // An offset directive consumes the whole line; last one wins.
            if let Some(offset) = scan_offset_tag(line) {
                offset_ms = offset;
                continue;
            }

            let (tags, stripped) = strip_time_tags(line);
            if tags.is_empty() || stripped.is_empty() {
                continue;
            }
            for time_ms in tags {
                lines.push(LyricLine {
                    time_ms,
                    text: stripped.clone(),
                });
            }
        }

        // Stable: cues sharing a timestamp keep parse order.
        lines.sort_by_key(|line| line.time_ms);

        Self { lines, offset_ms }
    }

    /// Parse from a reader. Unreadable or non-UTF-8 input yields the empty
    /// track.
    pub fn from_reader(mut reader: impl Read) -> Self {
        let mut text = String::new();
        match reader.read_to_string(&mut text) {
            Ok(_) => Self::parse(&text),
            Err(err) => {
                log::debug!("lyric source unreadable: {}", err);
                Self::empty()
            }
        }
    }

    /// Load and parse the resource behind `locator`. Any failure resolves
    /// to the empty track.
    pub fn load(catalog: &dyn MediaCatalog, locator: &Locator) -> Self {
        match catalog.open(locator) {
            Ok(reader) => Self::from_reader(reader),
            Err(err) => {
                log::debug!("lyric open failed for {}: {}", locator, err);
                Self::empty()
            }
        }
    }

    pub fn lines(&self) -> &[LyricLine] {
        &self.lines
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Greatest index whose cue time is at or before `position_ms` (after
    /// applying the global offset), or -1 before the first cue.
    pub fn current_line_index(&self, position_ms: i64) -> isize {
        let adjusted = position_ms + self.offset_ms;
        let upto = self
            .lines
            .partition_point(|line| line.time_ms <= adjusted);
        upto as isize - 1
    }

    /// The cue active at `position_ms`, if any.
    pub fn current_line(&self, position_ms: i64) -> Option<&LyricLine> {
        let index = self.current_line_index(position_ms);
        usize::try_from(index).ok().and_then(|i| self.lines.get(i))
    }

    /// The cue following the active one — what an overlay shows on its
    /// second row. Before the first cue this is the first cue.
    pub fn next_line(&self, position_ms: i64) -> Option<&LyricLine> {
        let index = self.current_line_index(position_ms) + 1;
        usize::try_from(index).ok().and_then(|i| self.lines.get(i))
    }
}

/// Parse `[offset:±N]` out of a line, if present anywhere in it.
fn scan_offset_tag(line: &str) -> Option<i64> {
    let start = line.find("[offset:")?;
    let rest = &line[start + "[offset:".len()..];
    let end = rest.find(']')?;
    rest[..end].trim().parse::<i64>().ok()
}

/// Collect every leading-or-embedded time tag in a line and return the tag
/// times plus the line text with all tags removed.
fn strip_time_tags(line: &str) -> (Vec<i64>, String) {
    let mut tags = Vec::new();
    let mut text = String::with_capacity(line.len());
    let bytes = line.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some((time_ms, tag_len)) = parse_time_tag(&line[i..]) {
                tags.push(time_ms);
                i += tag_len;
                continue;
            }
        }
        let ch = line[i..].chars().next().unwrap_or('\0');
        text.push(ch);
        i += ch.len_utf8();
    }

    (tags, text.trim().to_string())
}

/// Parse a `[mm:ss]` or `[mm:ss.xx]` tag at the start of `input`.
/// Returns the time in milliseconds and the tag's byte length.
fn parse_time_tag(input: &str) -> Option<(i64, usize)> {
    let bytes = input.as_bytes();
    if bytes.first() != Some(&b'[') {
        return None;
    }

    let minutes = two_digits(bytes.get(1..3)?)?;
    if bytes.get(3) != Some(&b':') {
        return None;
    }
    let seconds = two_digits(bytes.get(4..6)?)?;

    let (hundredths, close) = match bytes.get(6) {
        Some(b']') => (0, 6),
        Some(b'.') => {
            let frac = two_digits(bytes.get(7..9)?)?;
            if bytes.get(9) != Some(&b']') {
                return None;
            }
            (frac, 9)
        }
        _ => return None,
    };

    let time_ms = (minutes * 60 + seconds) * 1000 + hundredths * 10;
    Some((time_ms, close + 1))
}

fn two_digits(bytes: &[u8]) -> Option<i64> {
    if bytes.len() != 2 || !bytes[0].is_ascii_digit() || !bytes[1].is_ascii_digit() {
        return None;
    }
    Some(((bytes[0] - b'0') as i64) * 10 + (bytes[1] - b'0') as i64)
}

/// Candidate lyric filenames for a track, in priority order: the exact base
/// name, a `-lyrics` suffix, then the localized suffix variants shipped
/// alongside real collections.
fn candidate_names(display_name: &str) -> Vec<String> {
    let base = display_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(display_name);
    vec![
        format!("{base}.lrc"),
        format!("{base}-lyrics.lrc"),
        format!("{base}-歌词.lrc"),
        format!("{base}-歌词（中文）.lrc"),
        format!("{base}-歌词(中文).lrc"),
    ]
}

/// Search for the companion lyric resource of a playing track.
///
/// Strategies are tried in order until one yields a readable resource:
/// a concrete-path sibling probe, a container sibling listing matched
/// case-insensitively, and finally direct construction in locator space.
/// No match is not an error.
pub fn find_companion_lyric(
    catalog: &dyn MediaCatalog,
    locator: &Locator,
    display_name: &str,
) -> Option<Locator> {
    let candidates = candidate_names(display_name);
    log::debug!(
        "searching companion lyric for {} among {:?}",
        locator,
        candidates
    );

    // Concrete path: probe the track's own directory.
    if let Some(path) = catalog.resolve_path(locator) {
        if let Some(dir) = path.parent() {
            for name in &candidates {
                let probe = dir.join(name);
                if probe.is_file() {
                    let found = Locator::from(probe);
                    if catalog.open(&found).is_ok() {
                        log::debug!("companion lyric found by path probe: {}", found);
                        return Some(found);
                    }
                }
            }
        }
    }

    // Container listing: match siblings by name, candidate priority first.
    let siblings = catalog.siblings(locator);
    for name in &candidates {
        for (sibling_name, sibling) in &siblings {
            if sibling_name.eq_ignore_ascii_case(name) && catalog.open(sibling).is_ok() {
                log::debug!("companion lyric found by sibling listing: {}", sibling);
                return Some(sibling.clone());
            }
        }
    }

    // Last resort: construct the locator directly next to the track.
    let locator_str = locator.as_str();
    if let Some(slash) = locator_str.rfind('/') {
        for name in &candidates {
            let constructed = Locator::new(format!("{}/{}", &locator_str[..slash], name));
            if catalog.open(&constructed).is_ok() {
                log::debug!("companion lyric found by construction: {}", constructed);
                return Some(constructed);
            }
        }
    }

    log::debug!("no companion lyric for {}", locator);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FsCatalog;
    use std::io::Write;

    #[test]
    fn parses_tagged_lines_in_order() {
        let track = LyricTrack::parse("[00:01.50]Hello\n[00:02.00]World");
        assert_eq!(track.len(), 2);
        assert_eq!(track.lines()[0].time_ms, 1500);
        assert_eq!(track.lines()[0].text, "Hello");
        assert_eq!(track.lines()[1].time_ms, 2000);
        assert_eq!(track.lines()[1].text, "World");
        assert_eq!(track.offset_ms(), 0);
    }

    #[test]
    fn multiple_tags_fan_out_to_one_cue_each() {
        let track = LyricTrack::parse("[00:01.00][00:03.00]la");
        assert_eq!(track.len(), 2);
        assert_eq!(track.lines()[0].time_ms, 1000);
        assert_eq!(track.lines()[1].time_ms, 3000);
        assert!(track.lines().iter().all(|line| line.text == "la"));
    }

    #[test]
    fn offset_directive_is_global_and_last_wins() {
        let track = LyricTrack::parse("[offset:200]\n[00:01.00]a\n[offset:-500]");
        assert_eq!(track.offset_ms(), -500);
        assert_eq!(track.len(), 1);
        // 600 + (-500) = 100 < 1000 → before the first cue
        assert_eq!(track.current_line_index(600), -1);
        assert_eq!(track.current_line_index(1500), 0);
    }

    #[test]
    fn untagged_and_empty_lines_are_dropped() {
        let track = LyricTrack::parse("[ti:title]\nplain text\n\n[00:05.00]   \n[00:06.00]kept");
        assert_eq!(track.len(), 1);
        assert_eq!(track.lines()[0].text, "kept");
    }

    #[test]
    fn tolerates_crlf_and_sorts_by_time() {
        let track = LyricTrack::parse("[00:10.00]later\r\n[00:02.00]earlier\r\n");
        assert_eq!(track.lines()[0].text, "earlier");
        assert_eq!(track.lines()[1].text, "later");
    }

    #[test]
    fn lookup_is_a_monotonic_watermark() {
        let track = LyricTrack::parse("[00:00.00]a\n[00:01.00]b\n[00:02.00]c");
        assert_eq!(track.current_line_index(500), 0);
        assert_eq!(track.current_line_index(1999), 1);
        assert_eq!(track.current_line_index(2000), 2);
        assert_eq!(track.current_line_index(-100), -1);
    }

    #[test]
    fn current_and_next_line_pair_up() {
        let track = LyricTrack::parse("[00:01.00]a\n[00:02.00]b");
        assert!(track.current_line(0).is_none());
        assert_eq!(track.next_line(0).unwrap().text, "a");
        assert_eq!(track.current_line(1100).unwrap().text, "a");
        assert_eq!(track.next_line(1100).unwrap().text, "b");
        assert!(track.next_line(2100).is_none());
    }

    #[test]
    fn unreadable_source_yields_empty_track() {
        let catalog = FsCatalog::new();
        let track = LyricTrack::load(&catalog, &Locator::new("/nonexistent/x.lrc"));
        assert!(track.is_empty());
        assert_eq!(track.current_line_index(10_000), -1);
    }

    #[test]
    fn malformed_tags_are_left_as_text() {
        // A bad tag means no time tags at all → line dropped.
        let track = LyricTrack::parse("[0:01]short minute field");
        assert!(track.is_empty());
    }

    fn write_file(dir: &std::path::Path, name: &str, contents: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn companion_search_prefers_exact_base_name() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "again.mp3", "");
        write_file(dir.path(), "again.lrc", "[00:01.00]x");
        write_file(dir.path(), "again-lyrics.lrc", "[00:01.00]y");

        let catalog = FsCatalog::new();
        let locator = Locator::from(dir.path().join("again.mp3"));
        let found = find_companion_lyric(&catalog, &locator, "again.mp3").unwrap();
        assert!(found.as_str().ends_with("again.lrc"));
    }

    #[test]
    fn companion_search_falls_back_to_suffixed_names() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "again.mp3", "");
        write_file(dir.path(), "again-lyrics.lrc", "[00:01.00]y");

        let catalog = FsCatalog::new();
        let locator = Locator::from(dir.path().join("again.mp3"));
        let found = find_companion_lyric(&catalog, &locator, "again.mp3").unwrap();
        assert!(found.as_str().ends_with("again-lyrics.lrc"));

        let parsed = LyricTrack::load(&catalog, &found);
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn companion_search_yields_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "again.mp3", "");

        let catalog = FsCatalog::new();
        let locator = Locator::from(dir.path().join("again.mp3"));
        assert!(find_companion_lyric(&catalog, &locator, "again.mp3").is_none());
    }
}
