use crate::navigation::{NavAction, next_index};
use crate::search::{Searchable, apply_filter, search};
use crate::viewport::ensure_visible;

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Pagination {
    pub token: Option<String>,
    pub truncated: bool,
}

/// Canonical items plus the derived filtered view. `selected` and `offset` always index into
/// whichever of the two is active.
#[derive(Debug, Clone)]
pub struct ListState<T> {
    items: Vec<T>,
    filtered: Option<Vec<T>>,
    selected: usize,
    offset: usize,
    pagination: Pagination,
}

impl<T> Default for ListState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            filtered: None,
            selected: 0,
            offset: 0,
            pagination: Pagination::default(),
        }
    }
}

impl<T: Clone> ListState<T> {
    pub fn with_items(items: Vec<T>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn active(&self) -> &[T] {
        self.filtered.as_deref().unwrap_or(&self.items)
    }

    pub fn len(&self) -> usize {
        self.active().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active().is_empty()
    }

    pub fn is_filtered(&self) -> bool {
        self.filtered.is_some()
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn selected(&self) -> Option<&T> {
        self.active().get(self.selected)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    pub fn set_pagination(&mut self, pagination: Pagination) {
        self.pagination = pagination;
    }

    /// Replaces the canonical items, keeping the cursor on the same record when it survives.
    pub fn replace_items<K: PartialEq>(&mut self, items: Vec<T>, key: impl Fn(&T) -> K) {
        let previous = self.selected().map(&key);
        self.items = items;
        self.filtered = None;
        self.selected = previous
            .and_then(|previous| self.items.iter().position(|item| key(item) == previous))
            .unwrap_or(self.selected);
        self.clamp_selection();
    }

    pub fn set_items(&mut self, items: Vec<T>) {
        self.items = items;
        self.filtered = None;
        self.selected = 0;
        self.offset = 0;
    }

    pub fn set_filtered(&mut self, filtered: Vec<T>) {
        self.filtered = Some(filtered);
        self.selected = 0;
        self.offset = 0;
    }

    pub fn clear_filter(&mut self) {
        if self.filtered.take().is_some() {
            self.selected = 0;
            self.offset = 0;
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn navigate(&mut self, action: NavAction, page_size: usize, height: usize) {
        self.selected = next_index(action, self.selected, self.len(), page_size);
        self.reveal(height);
    }

    pub fn select(&mut self, index: usize, height: usize) {
        self.selected = index;
        self.clamp_selection();
        self.reveal(height);
    }

    pub fn reveal(&mut self, height: usize) {
        self.offset = ensure_visible(self.selected, self.len(), height, self.offset);
    }

    fn clamp_selection(&mut self) {
        let len = self.len();
        if len == 0 {
            self.selected = 0;
        } else if self.selected >= len {
            self.selected = len - 1;
        }
    }
}

impl<T: Clone + Searchable> ListState<T> {
    /// Re-runs `query` against the canonical items and installs the filtered view. An empty
    /// query drops the view.
    pub fn refilter(&mut self, query: &str) -> Vec<usize> {
        if query.is_empty() {
            self.clear_filter();
            return Vec::new();
        }
        let matches = search(query, &self.items, Searchable::search_key);
        let filtered = apply_filter(&self.items, &matches);
        self.set_filtered(filtered);
        matches
    }
}

/// Type-erased view of a list so the app can drive whichever one is on screen.
pub trait ListOps {
    fn len(&self) -> usize;
    fn selected_index(&self) -> usize;
    fn is_filtered(&self) -> bool;
    fn navigate(&mut self, action: NavAction, page_size: usize, height: usize);
    fn select(&mut self, index: usize, height: usize);
    fn reveal(&mut self, height: usize);
    fn refilter(&mut self, query: &str) -> Vec<usize>;
    fn clear_filter(&mut self);
}

impl<T: Clone + Searchable> ListOps for ListState<T> {
    fn len(&self) -> usize {
        ListState::len(self)
    }

    fn selected_index(&self) -> usize {
        ListState::selected_index(self)
    }

    fn is_filtered(&self) -> bool {
        ListState::is_filtered(self)
    }

    fn navigate(&mut self, action: NavAction, page_size: usize, height: usize) {
        ListState::navigate(self, action, page_size, height);
    }

    fn select(&mut self, index: usize, height: usize) {
        ListState::select(self, index, height);
    }

    fn reveal(&mut self, height: usize) {
        ListState::reveal(self, height);
    }

    fn refilter(&mut self, query: &str) -> Vec<usize> {
        ListState::refilter(self, query)
    }

    fn clear_filter(&mut self) {
        ListState::clear_filter(self);
    }
}

#[cfg(test)]
mod tests {
    use super::ListState;
    use crate::navigation::NavAction;
    use crate::search::Searchable;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Row(&'static str);

    impl Searchable for Row {
        fn search_key(&self) -> String {
            self.0.to_string()
        }
    }

    fn rows() -> Vec<Row> {
        vec![Row("ec2-1"), Row("ec2-2"), Row("s3-x"), Row("ec2-3")]
    }

    #[test]
    fn refilter_resets_selection_into_view() {
        let mut list = ListState::with_items(rows());
        list.select(2, 10);
        let matches = list.refilter("ec2");
        assert_eq!(matches, vec![0, 1, 3]);
        assert_eq!(list.selected(), Some(&Row("ec2-1")));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn empty_match_set_leaves_empty_active_list() {
        let mut list = ListState::with_items(rows());
        list.refilter("nothing");
        assert!(list.is_filtered());
        assert!(list.is_empty());
        assert_eq!(list.selected_index(), 0);
        assert_eq!(list.selected(), None);
    }

    #[test]
    fn replace_items_keeps_cursor_on_same_record() {
        let mut list = ListState::with_items(rows());
        list.select(3, 10);
        list.replace_items(vec![Row("ec2-3"), Row("ec2-1")], |row| row.0);
        assert_eq!(list.selected(), Some(&Row("ec2-3")));
    }

    #[test]
    fn replace_items_clamps_when_record_disappears() {
        let mut list = ListState::with_items(rows());
        list.select(3, 10);
        list.replace_items(vec![Row("a")], |row| row.0);
        assert_eq!(list.selected_index(), 0);
    }

    #[test]
    fn navigation_keeps_selection_visible() {
        let items = (0..40).map(|_| Row("x")).collect::<Vec<_>>();
        let mut list = ListState::with_items(items);
        list.navigate(NavAction::PageDown, 20, 10);
        assert_eq!(list.selected_index(), 20);
        assert_eq!(list.offset(), 11);
        list.navigate(NavAction::Top, 20, 10);
        assert_eq!(list.offset(), 0);
    }
}
