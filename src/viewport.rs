use std::ops::Range;

/// Smallest scroll that keeps `selected` inside `[offset, offset + height)`.
pub fn ensure_visible(selected: usize, len: usize, height: usize, offset: usize) -> usize {
    if len == 0 || height == 0 {
        return 0;
    }

    let max_offset = len.saturating_sub(height);
    let selected = selected.min(len - 1);
    let mut offset = offset.min(max_offset);

    if selected < offset {
        offset = selected;
    } else if selected >= offset + height {
        offset = selected + 1 - height;
    }

    offset.min(max_offset)
}

pub fn visible_range(offset: usize, len: usize, height: usize) -> Range<usize> {
    let start = offset.min(len);
    let end = start.saturating_add(height).min(len);
    start..end
}
