/// Records that can be matched by the `/` search. The key is the concatenation of the fields a
/// user would type, already separated by spaces.
pub trait Searchable {
    fn search_key(&self) -> String;
}

/// Indices of `items` whose key contains `query`, case-insensitively, in original order.
pub fn search<T>(query: &str, items: &[T], key_fn: impl Fn(&T) -> String) -> Vec<usize> {
    let needle = query.to_lowercase();
    items
        .iter()
        .enumerate()
        .filter(|(_, item)| key_fn(item).to_lowercase().contains(&needle))
        .map(|(index, _)| index)
        .collect()
}

pub fn apply_filter<T: Clone>(items: &[T], matches: &[usize]) -> Vec<T> {
    matches
        .iter()
        .filter_map(|index| items.get(*index).cloned())
        .collect()
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SearchState {
    query: String,
    last_applied: String,
    matches: Vec<usize>,
    position: usize,
    committed: Option<(Vec<usize>, usize)>,
}

impl SearchState {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn last_applied(&self) -> &str {
        &self.last_applied
    }

    pub fn matches(&self) -> &[usize] {
        &self.matches
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_active(&self) -> bool {
        !self.last_applied.is_empty()
    }

    /// Starts a fresh query; the committed query survives so Escape can fall back to it.
    pub fn begin(&mut self) {
        self.committed = Some((std::mem::take(&mut self.matches), self.position));
        self.query.clear();
        self.position = 0;
    }

    pub fn push(&mut self, c: char) {
        self.query.push(c);
    }

    pub fn pop(&mut self) {
        self.query.pop();
    }

    pub fn set_matches(&mut self, matches: Vec<usize>) {
        self.matches = matches;
        self.position = 0;
    }

    /// Installs matches recomputed against a list that changed underneath the query. The
    /// cursor stays put when it still points inside the new matches.
    pub fn resync(&mut self, matches: Vec<usize>) {
        if self.position >= matches.len() {
            self.position = 0;
        }
        self.matches = matches;
    }

    pub fn commit(&mut self) {
        self.committed = None;
        self.last_applied = self.query.trim().to_string();
        if self.last_applied.is_empty() {
            self.matches.clear();
        }
        self.position = 0;
    }

    /// Drops the in-progress query and returns to whatever was committed before `begin`.
    pub fn cancel(&mut self) {
        self.query.clear();
        match self.committed.take() {
            Some((matches, position)) => {
                self.matches = matches;
                self.position = position;
            }
            None => {
                self.matches.clear();
                self.position = 0;
            }
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Advances the match cursor; returns the new position inside the match list.
    pub fn next_match(&mut self) -> Option<usize> {
        if self.last_applied.is_empty() || self.matches.is_empty() {
            return None;
        }
        self.position = (self.position + 1) % self.matches.len();
        Some(self.position)
    }

    pub fn prev_match(&mut self) -> Option<usize> {
        if self.last_applied.is_empty() || self.matches.is_empty() {
            return None;
        }
        let len = self.matches.len() as isize;
        self.position = (self.position as isize - 1).rem_euclid(len) as usize;
        Some(self.position)
    }
}
