//! Auto pagination of API calls.
//!
//! Pages are plain JSON values. A [`PageSource`] produces them one at a
//! time, and [`paginate`] flattens the lists found at the requested keys
//! into a sequence of values:
//!
//! ```ignore
//! // every row of every page
//! let mut rows = paginate(pages, &["ResultSet.Rows"]);
//! // versions and delete markers side by side, padded with `null`
//! let mut both = paginate(pages, &["Versions", "DeleteMarkers"]);
//! while let Some(pair) = both.next().await {
//!     let pair = pair?;
//! }
//! ```
use std::{collections::VecDeque, future::Future};

use crate::Result;

/// A source of result pages.
pub trait PageSource {
    /// The next page, or `None` once the source is drained.
    fn next_page(&mut self) -> impl Future<Output = Option<Result<serde_json::Value>>>;
}

/// Pages that are already in memory.
impl PageSource for std::vec::IntoIter<serde_json::Value> {
    async fn next_page(&mut self) -> Option<Result<serde_json::Value>> {
        self.next().map(Ok)
    }
}

/// Pages fetched through a continuation token.
///
/// `fetch` is called with the previous page's token (`None` for the first
/// page) and returns a page along with the token of the next one.
pub struct TokenPages<F> {
    fetch: F,
    next_token: Option<String>,
    done: bool,
}

impl<F> TokenPages<F> {
    pub fn new(fetch: F) -> Self {
        TokenPages {
            fetch,
            next_token: None,
            done: false,
        }
    }
}

impl<F, Fut> PageSource for TokenPages<F>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<(serde_json::Value, Option<String>)>>,
{
    async fn next_page(&mut self) -> Option<Result<serde_json::Value>> {
        if self.done {
            return None;
        }
        match (self.fetch)(self.next_token.take()).await {
            Ok((page, next_token)) => {
                log::trace!("fetched page, next token: {next_token:?}");
                self.done = next_token.is_none();
                self.next_token = next_token;
                Some(Ok(page))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Looks up a dot separated key, treating anything missing as an empty list.
fn lookup<'a>(page: &'a serde_json::Value, key: &str) -> &'a [serde_json::Value] {
    key.split('.')
        .try_fold(page, |value, part| value.get(part))
        .and_then(serde_json::Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Flattens one page.
///
/// With a single key this is the list at that key. With several keys it is
/// one array per index holding each key's value at that index, `null` where
/// a key's list is shorter than the longest.
pub(crate) fn select(page: &serde_json::Value, iter_keys: &[String]) -> Vec<serde_json::Value> {
    let results = iter_keys
        .iter()
        .map(|key| lookup(page, key))
        .collect::<Vec<_>>();
    let longest = results.iter().map(|r| r.len()).max().unwrap_or(0);
    (0..longest)
        .map(|i| {
            if let [only] = results.as_slice() {
                only[i].clone()
            } else {
                serde_json::Value::Array(
                    results
                        .iter()
                        .map(|r| r.get(i).cloned().unwrap_or(serde_json::Value::Null))
                        .collect(),
                )
            }
        })
        .collect()
}

/// Flattened results of a paginated call, see [`paginate`].
pub struct Paginator<S> {
    source: S,
    iter_keys: Vec<String>,
    buffered: VecDeque<serde_json::Value>,
}

impl<S: PageSource> Paginator<S> {
    /// The next value, fetching pages as needed.
    pub async fn next(&mut self) -> Option<Result<serde_json::Value>> {
        loop {
            if let Some(value) = self.buffered.pop_front() {
                return Some(Ok(value));
            }
            match self.source.next_page().await? {
                Ok(page) => self.buffered.extend(select(&page, &self.iter_keys)),
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Drains every page.
    pub async fn try_collect(mut self) -> Result<Vec<serde_json::Value>> {
        let mut values = vec![];
        while let Some(value) = self.next().await {
            values.push(value?);
        }
        Ok(values)
    }
}

/// Paginates `source`, yielding the values listed under `iter_keys`.
///
/// Keys use dot notation for nested objects, ie `"ResultSet.Rows"`.
pub fn paginate<S: PageSource>(source: S, iter_keys: &[&str]) -> Paginator<S> {
    Paginator {
        source,
        iter_keys: iter_keys.iter().map(|key| key.to_string()).collect(),
        buffered: VecDeque::new(),
    }
}
