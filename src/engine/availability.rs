use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Spans blocked on a room within the query window: every non-cancelled
/// booking's stay, clamped to the window, merged into disjoint intervals.
pub fn blocked_spans(room: &RoomState, query: &Span) -> Vec<Span> {
    let mut blocked: Vec<Span> = room
        .overlapping(query)
        .filter(|b| b.status.blocks_availability())
        .map(|b| {
            Span::new(
                b.span.start.max(query.start),
                b.span.end.min(query.end),
            )
        })
        .collect();
    blocked.sort_by_key(|s| s.start);
    merge_overlapping(&blocked)
}

/// Free calendar for a room: the query window minus its blocked spans.
/// A room under maintenance has no free time at all.
pub fn free_spans(room: &RoomState, query: &Span) -> Vec<Span> {
    if room.maintenance {
        return Vec::new();
    }
    let blocked = blocked_spans(room, query);
    if blocked.is_empty() {
        return vec![*query];
    }
    subtract_intervals(&[*query], &blocked)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
