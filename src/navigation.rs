/// Movement vocabulary shared by list screens and scrollable detail screens.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum NavAction {
    Up,
    Down,
    Top,
    Bottom,
    HalfPageUp,
    HalfPageDown,
    PageUp,
    PageDown,
}

/// New selection index for `action`, always inside `[0, len - 1]` (0 for an empty list).
pub fn next_index(action: NavAction, current: usize, len: usize, page_size: usize) -> usize {
    if len == 0 {
        return 0;
    }

    let max_index = len - 1;
    let current = current.min(max_index);
    let half = (page_size / 2).max(1);
    let page = page_size.max(1);

    match action {
        NavAction::Up => current.saturating_sub(1),
        NavAction::Down => current.saturating_add(1).min(max_index),
        NavAction::Top => 0,
        NavAction::Bottom => max_index,
        NavAction::HalfPageUp => current.saturating_sub(half),
        NavAction::HalfPageDown => current.saturating_add(half).min(max_index),
        NavAction::PageUp => current.saturating_sub(page),
        NavAction::PageDown => current.saturating_add(page).min(max_index),
    }
}

/// Detail screens have no selection; the same actions move the scroll offset instead.
pub fn scroll_offset(
    action: NavAction,
    offset: usize,
    max_offset: usize,
    page_size: usize,
) -> usize {
    let half = (page_size / 2).max(1);
    let page = page_size.max(1);
    let next = match action {
        NavAction::Up => offset.saturating_sub(1),
        NavAction::Down => offset.saturating_add(1),
        NavAction::Top => 0,
        NavAction::Bottom => max_offset,
        NavAction::HalfPageUp => offset.saturating_sub(half),
        NavAction::HalfPageDown => offset.saturating_add(half),
        NavAction::PageUp => offset.saturating_sub(page),
        NavAction::PageDown => offset.saturating_add(page),
    };
    next.min(max_offset)
}

#[cfg(test)]
mod tests {
    use super::{NavAction, next_index, scroll_offset};

    const ALL: [NavAction; 8] = [
        NavAction::Up,
        NavAction::Down,
        NavAction::Top,
        NavAction::Bottom,
        NavAction::HalfPageUp,
        NavAction::HalfPageDown,
        NavAction::PageUp,
        NavAction::PageDown,
    ];

    #[test]
    fn next_index_never_leaves_bounds() {
        for len in 0..30 {
            for current in 0..35 {
                for page in [0, 1, 2, 7, 20] {
                    for action in ALL {
                        let next = next_index(action, current, len, page);
                        if len == 0 {
                            assert_eq!(next, 0);
                        } else {
                            assert!(next < len, "{action:?} {current} {len} {page} -> {next}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn half_page_down_clamps_to_last_item() {
        assert_eq!(next_index(NavAction::HalfPageDown, 5, 10, 20), 9);
    }

    #[test]
    fn up_and_down_do_not_wrap() {
        assert_eq!(next_index(NavAction::Up, 0, 4, 20), 0);
        assert_eq!(next_index(NavAction::Down, 3, 4, 20), 3);
        assert_eq!(next_index(NavAction::Down, 1, 4, 20), 2);
    }

    #[test]
    fn page_moves_by_full_page() {
        assert_eq!(next_index(NavAction::PageDown, 0, 100, 20), 20);
        assert_eq!(next_index(NavAction::PageUp, 30, 100, 20), 10);
        assert_eq!(next_index(NavAction::HalfPageUp, 30, 100, 20), 20);
        assert_eq!(next_index(NavAction::Bottom, 0, 100, 20), 99);
        assert_eq!(next_index(NavAction::Top, 50, 100, 20), 0);
    }

    #[test]
    fn scroll_offset_is_clamped_to_extent() {
        assert_eq!(scroll_offset(NavAction::Down, 4, 4, 20), 4);
        assert_eq!(scroll_offset(NavAction::PageDown, 0, 12, 20), 12);
        assert_eq!(scroll_offset(NavAction::HalfPageUp, 3, 12, 20), 0);
        assert_eq!(scroll_offset(NavAction::Bottom, 0, 7, 20), 7);
    }
}
