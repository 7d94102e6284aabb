//! Coverage of a byte range by inactive blocks.
//!
//! [`coverage`] answers "how much of `[start, end)` can be classified" for a
//! sorted, non-overlapping list of inactive blocks:
//!
//! - no block intersects the range: the whole range is active, `Some(len)`;
//! - the range lies inside one block, or inside a contiguous run of blocks:
//!   the whole range is inactive, `Some(len)`;
//! - the range contains whole blocks and both of its edges are active:
//!   `Some(active length)`, the range length minus the contained blocks;
//! - the range starts or ends strictly inside a block while also covering
//!   active text: `None`, the classification is undefined.
//!
//! An empty range yields `Some(0)`, a reversed range `None`.

use codemodel_parser_api::TextRange;

/// Coverage of `[start, end)` by `blocks`; see the module docs.
pub fn coverage(blocks: &[TextRange], start: usize, end: usize) -> Option<usize> {
    if start > end {
        return None;
    }
    let len = end - start;
    if len == 0 {
        return Some(0);
    }

    let intersecting = intersecting(blocks, start, end);
    if intersecting.is_empty() {
        return Some(len);
    }

    // Contiguous inactive run covering the whole range
    let mut cursor = start;
    let mut gap = false;
    for block in intersecting {
        if block.start > cursor {
            gap = true;
            break;
        }
        cursor = cursor.max(block.end);
    }
    if !gap && cursor >= end {
        return Some(len);
    }

    let mut inactive = 0;
    for block in intersecting {
        if block.start < start || block.end > end {
            return None;
        }
        inactive += block.len();
    }
    Some(len - inactive)
}

/// Bytes of `[start, end)` outside every block. Partial overlaps are clipped,
/// so this is always defined.
pub fn active_length(blocks: &[TextRange], start: usize, end: usize) -> usize {
    if start >= end {
        return 0;
    }
    let inactive: usize = intersecting(blocks, start, end)
        .iter()
        .map(|b| b.end.min(end) - b.start.max(start))
        .sum();
    (end - start).saturating_sub(inactive)
}

/// Blocks overlapping `[start, end)`, using the sort order to skip ahead.
fn intersecting(blocks: &[TextRange], start: usize, end: usize) -> &[TextRange] {
    let first = blocks.partition_point(|b| b.end <= start);
    let last = first + blocks[first..].partition_point(|b| b.start < end);
    &blocks[first..last]
}
