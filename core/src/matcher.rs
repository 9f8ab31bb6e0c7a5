use std::time::Duration;

use indexmap::IndexMap;
use tokio::time::Instant;
use tracing::trace;

use crate::error::CaptureError;
use crate::line::Line;
use crate::queue::LineQueue;

/// Patterns handed to `read_until`: one byte string or a collection of them.
///
/// Patterns are matched as raw, case-sensitive substrings. Repeating a
/// pattern has no effect beyond its first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expected(Vec<Vec<u8>>);

impl Expected {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pattern: impl AsRef<[u8]>) {
        self.0.push(pattern.as_ref().to_vec());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &[u8]> {
        self.0.iter().map(Vec::as_slice)
    }
}

impl From<&str> for Expected {
    fn from(pattern: &str) -> Self {
        Self(vec![pattern.as_bytes().to_vec()])
    }
}

impl From<String> for Expected {
    fn from(pattern: String) -> Self {
        Self(vec![pattern.into_bytes()])
    }
}

impl From<&[u8]> for Expected {
    fn from(pattern: &[u8]) -> Self {
        Self(vec![pattern.to_vec()])
    }
}

impl<const N: usize> From<&[u8; N]> for Expected {
    fn from(pattern: &[u8; N]) -> Self {
        Self(vec![pattern.to_vec()])
    }
}

impl From<Vec<u8>> for Expected {
    fn from(pattern: Vec<u8>) -> Self {
        Self(vec![pattern])
    }
}

impl<T: AsRef<[u8]>, const N: usize> From<[T; N]> for Expected {
    fn from(patterns: [T; N]) -> Self {
        patterns.into_iter().collect()
    }
}

impl From<Vec<Vec<u8>>> for Expected {
    fn from(patterns: Vec<Vec<u8>>) -> Self {
        Self(patterns)
    }
}

impl From<Vec<&str>> for Expected {
    fn from(patterns: Vec<&str>) -> Self {
        patterns.into_iter().collect()
    }
}

impl From<Vec<&[u8]>> for Expected {
    fn from(patterns: Vec<&[u8]>) -> Self {
        patterns.into_iter().collect()
    }
}

impl<T: AsRef<[u8]>> FromIterator<T> for Expected {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|pattern| pattern.as_ref().to_vec())
                .collect(),
        )
    }
}

/// How long `read_until` may wait for lines that have not arrived yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wait {
    /// Only look at what is already queued.
    #[default]
    DrainOnly,
    /// Wait up to this long in total for further lines.
    Within(Duration),
}

impl Wait {
    /// `None` keeps the non-blocking behaviour; it never means "forever".
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map_or(Self::DrainOnly, Self::Within)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    /// Every pattern has to be found.
    #[default]
    All,
    /// The first found pattern ends the search.
    Any,
}

/// Where each pattern was first seen, as an index into [`MatchResult::lines`].
/// Iteration follows the order the patterns were given in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternSet {
    found: IndexMap<Vec<u8>, Option<usize>>,
}

impl PatternSet {
    fn new(expected: &Expected) -> Self {
        let mut found = IndexMap::with_capacity(expected.len());
        for pattern in expected.patterns() {
            found.entry(pattern.to_vec()).or_insert(None);
        }
        Self { found }
    }

    /// Index of the first line containing `pattern`; `None` if it was never
    /// seen or was not part of the query.
    pub fn found_at(&self, pattern: impl AsRef<[u8]>) -> Option<usize> {
        self.found.get(pattern.as_ref()).copied().flatten()
    }

    pub fn is_found(&self, pattern: impl AsRef<[u8]>) -> bool {
        self.found_at(pattern).is_some()
    }

    pub fn missing(&self) -> impl Iterator<Item = &[u8]> {
        self.found
            .iter()
            .filter(|(_, index)| index.is_none())
            .map(|(pattern, _)| pattern.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], Option<usize>)> {
        self.found
            .iter()
            .map(|(pattern, index)| (pattern.as_slice(), *index))
    }

    pub fn len(&self) -> usize {
        self.found.len()
    }

    pub fn is_empty(&self) -> bool {
        self.found.is_empty()
    }

    fn record(&mut self, line: &Line, index: usize) {
        for (pattern, found) in self.found.iter_mut() {
            if found.is_none() && line.contains(pattern) {
                *found = Some(index);
            }
        }
    }

    fn satisfies(&self, policy: MatchPolicy) -> bool {
        match policy {
            MatchPolicy::All => self.found.values().all(Option::is_some),
            MatchPolicy::Any => self.found.values().any(Option::is_some),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub success: bool,
    /// Every line consumed by the call, in arrival order.
    pub lines: Vec<Line>,
    pub pattern_set: PatternSet,
}

/// State of one `read_until` call.
#[derive(Debug)]
struct Search {
    policy: MatchPolicy,
    lines: Vec<Line>,
    pattern_set: PatternSet,
}

impl Search {
    fn new(expected: &Expected, policy: MatchPolicy) -> Result<Self, CaptureError> {
        if expected.is_empty() {
            return Err(CaptureError::NoPatterns);
        }
        Ok(Self {
            policy,
            lines: Vec::new(),
            pattern_set: PatternSet::new(expected),
        })
    }

    /// Returns true once the policy is satisfied.
    fn consume(&mut self, line: Line) -> bool {
        let index = self.lines.len();
        self.pattern_set.record(&line, index);
        self.lines.push(line);
        self.pattern_set.satisfies(self.policy)
    }

    fn finish(self) -> MatchResult {
        MatchResult {
            success: self.pattern_set.satisfies(self.policy),
            lines: self.lines,
            pattern_set: self.pattern_set,
        }
    }
}

/// Consume lines from `queue` until `expected` is satisfied under `policy`
/// or, depending on `wait`, the queue runs dry or the deadline passes.
pub async fn read_until(
    queue: &LineQueue,
    expected: &Expected,
    wait: Wait,
    policy: MatchPolicy,
) -> Result<MatchResult, CaptureError> {
    let mut search = Search::new(expected, policy)?;
    match wait {
        Wait::DrainOnly => {
            while let Some(line) = queue.pop_now() {
                if search.consume(line) {
                    break;
                }
            }
        }
        Wait::Within(bound) => {
            let deadline = Instant::now() + bound;
            while let Some(line) = queue.pop_before(deadline).await {
                if search.consume(line) {
                    break;
                }
            }
        }
    }
    let result = search.finish();
    trace!(
        success = result.success,
        consumed = result.lines.len(),
        "read_until finished"
    );
    Ok(result)
}
