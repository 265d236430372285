/// Below this many items windowing is skipped and the whole list is rendered:
/// the fixed overhead of windowed layout buys nothing for short lists.
pub const WINDOWING_THRESHOLD: usize = 200;

/// Scroll and sizing state owned by the rendering consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// Scroll position in pixels/cells from the top of the content.
    pub scroll_offset: usize,
    /// Visible height of the viewport.
    pub height: usize,
    /// Fixed height of a single row.
    pub row_height: usize,
    /// Rows materialized beyond each edge of the visible band.
    pub overscan: usize,
}

impl Viewport {
    pub fn new(height: usize, row_height: usize, overscan: usize) -> Self {
        Self {
            scroll_offset: 0,
            height,
            row_height: row_height.max(1),
            overscan,
        }
    }

    /// Number of rows that fit the viewport, rounded up.
    pub fn visible_count(&self) -> usize {
        self.height.div_ceil(self.row_height)
    }

    pub fn max_scroll_offset(&self, len: usize) -> usize {
        (len * self.row_height).saturating_sub(self.height)
    }

    pub fn scroll_by(&mut self, delta: isize, len: usize) {
        let next = self.scroll_offset.saturating_add_signed(delta);
        self.scroll_offset = next.min(self.max_scroll_offset(len));
    }

    pub fn resize(&mut self, height: usize, len: usize) {
        self.height = height;
        self.scroll_offset = self.scroll_offset.min(self.max_scroll_offset(len));
    }
}

/// Derived visible sub-range; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleRange {
    pub start: usize,
    pub end: usize,
}

impl VisibleRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// How the consumer should materialize rows this frame.
///
/// Two interchangeable strategies behind one entry point, selected by
/// measured length rather than hard-coded per view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPlan {
    /// Render every row directly.
    Full { len: usize },
    /// Materialize only `range`; `total_height` sizes the scroll container so
    /// native scrolling behaves as if all rows existed.
    Windowed {
        range: VisibleRange,
        total_height: usize,
    },
}

impl RenderPlan {
    /// The index range the consumer must materialize.
    pub fn range(&self) -> VisibleRange {
        match *self {
            RenderPlan::Full { len } => VisibleRange { start: 0, end: len },
            RenderPlan::Windowed { range, .. } => range,
        }
    }
}

/// Computes the render plan for a list of `len` rows under `viewport`.
///
/// Must be re-run whenever `len`, the scroll offset, or the viewport height
/// changes.
pub fn plan(len: usize, viewport: &Viewport) -> RenderPlan {
    if len < WINDOWING_THRESHOLD {
        return RenderPlan::Full { len };
    }

    let start = (viewport.scroll_offset / viewport.row_height).saturating_sub(viewport.overscan);
    let visible = viewport.visible_count();
    let end = len.min(start + visible + 2 * viewport.overscan);
    // Scrolled past the end (e.g. the stream evicted entries): clamp so the
    // range stays valid.
    let start = start.min(end);

    RenderPlan::Windowed {
        range: VisibleRange { start, end },
        total_height: len * viewport.row_height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_lists_skip_windowing() {
        let viewport = Viewport::new(400, 22, 15);
        let plan = plan(199, &viewport);
        assert_eq!(plan, RenderPlan::Full { len: 199 });
        assert_eq!(plan.range(), VisibleRange { start: 0, end: 199 });
    }

    #[test]
    fn window_at_top_of_long_list() {
        // N=2000, rowHeight=22, viewportHeight=400, scrollOffset=0, overscan=15
        let viewport = Viewport::new(400, 22, 15);
        match plan(2000, &viewport) {
            RenderPlan::Windowed {
                range,
                total_height,
            } => {
                assert_eq!(range.start, 0);
                assert_eq!(viewport.visible_count(), 19);
                assert_eq!(range.end, 49);
                assert_eq!(total_height, 2000 * 22);
            }
            RenderPlan::Full { .. } => panic!("expected windowed plan"),
        }
    }

    #[test]
    fn window_in_the_middle_applies_overscan_both_ways() {
        let mut viewport = Viewport::new(400, 22, 15);
        viewport.scroll_offset = 22 * 500;
        match plan(2000, &viewport) {
            RenderPlan::Windowed { range, .. } => {
                assert_eq!(range.start, 485);
                assert_eq!(range.end, 485 + 19 + 30);
            }
            RenderPlan::Full { .. } => panic!("expected windowed plan"),
        }
    }

    #[test]
    fn range_invariants_hold_across_inputs() {
        let lens = [0, 1, 199, 200, 201, 1000, 5000];
        let offsets = [0usize, 10, 199, 4400, 11_000, 1_000_000];
        for len in lens {
            for offset in offsets {
                let mut viewport = Viewport::new(400, 22, 15);
                viewport.scroll_offset = offset;
                let range = plan(len, &viewport).range();
                assert!(range.start <= range.end);
                assert!(range.end <= len);
                if len >= WINDOWING_THRESHOLD
                    && len >= viewport.visible_count()
                    && offset <= viewport.max_scroll_offset(len)
                {
                    assert!(range.len() >= viewport.visible_count());
                }
            }
        }
    }

    #[test]
    fn scroll_clamps_to_content_height() {
        let mut viewport = Viewport::new(100, 10, 2);
        viewport.scroll_by(10_000, 50);
        assert_eq!(viewport.scroll_offset, 50 * 10 - 100);
        viewport.scroll_by(-10_000, 50);
        assert_eq!(viewport.scroll_offset, 0);
    }

    #[test]
    fn resize_revalidates_scroll_offset() {
        let mut viewport = Viewport::new(100, 10, 2);
        viewport.scroll_by(isize::MAX, 500);
        let before = viewport.scroll_offset;
        viewport.resize(400, 500);
        assert!(viewport.scroll_offset <= before);
        assert_eq!(viewport.scroll_offset, viewport.max_scroll_offset(500));
    }
}
