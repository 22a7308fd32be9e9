//! Viewport atlas layout.
//!
//! Views are packed two per row: left and right side by side, contexts in the
//! first row and focus views below them. The atlas is the bounding box of
//! every set that may be rendered into the same swap chain.

use crate::runtime::{Runtime, TextureSizeType, Viewport};

/// Smallest viewport edge accepted from the runtime.
pub const MIN_VIEWPORT_SIZE: i32 = 256;
/// Largest viewport edge accepted from the runtime.
pub const MAX_VIEWPORT_SIZE: i32 = 8096;

/// Views rendered per eye pair row.
const VIEWS_PER_ROW: usize = 2;

/// Viewports of one layout inside the atlas.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewportLayout {
    viewports: Vec<Viewport>,
}

impl ViewportLayout {
    /// Pack views of the given sizes, clamping each edge to the supported range.
    pub fn from_sizes(sizes: &[(i32, i32)]) -> Self {
        let mut viewports = Vec::with_capacity(sizes.len());
        let (mut x, mut y) = (0, 0);
        let mut row_height = 0;
        for (i, &(width, height)) in sizes.iter().enumerate() {
            let width = width.clamp(MIN_VIEWPORT_SIZE, MAX_VIEWPORT_SIZE);
            let height = height.clamp(MIN_VIEWPORT_SIZE, MAX_VIEWPORT_SIZE);
            viewports.push(Viewport::new(x, y, width, height));
            x += width;
            row_height = row_height.max(height);
            if (i + 1) % VIEWS_PER_ROW == 0 {
                x = 0;
                y += row_height;
                row_height = 0;
            }
        }
        Self { viewports }
    }

    /// Query the recommended sizes of `view_count` views from the runtime.
    pub fn query(runtime: &dyn Runtime, size_type: TextureSizeType, view_count: usize) -> Self {
        let sizes: Vec<_> = (0..view_count)
            .map(|view| runtime.texture_size(size_type, view))
            .collect();
        Self::from_sizes(&sizes)
    }

    pub fn viewports(&self) -> &[Viewport] {
        &self.viewports
    }

    pub fn get(&self, view: usize) -> Option<Viewport> {
        self.viewports.get(view).copied()
    }

    pub fn len(&self) -> usize {
        self.viewports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.viewports.is_empty()
    }

    /// Bounding box of the layout.
    pub fn extent(&self) -> (i32, i32) {
        self.viewports.iter().fold((0, 0), |(w, h), vp| {
            (w.max(vp.right()), h.max(vp.bottom()))
        })
    }
}

/// Static and, when requested, dynamically foveated viewports sharing one atlas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewportSets {
    static_set: ViewportLayout,
    foveated: Option<ViewportLayout>,
}

impl ViewportSets {
    /// Two stereo views, or context and focus views for each eye.
    pub fn new(runtime: &dyn Runtime, stereo: bool, dynamic_viewports: bool) -> Self {
        let (size_type, view_count) = if stereo {
            (TextureSizeType::Stereo, 2)
        } else {
            (TextureSizeType::Quad, runtime.view_count())
        };
        let static_set = ViewportLayout::query(runtime, size_type, view_count);
        let foveated = dynamic_viewports
            .then(|| ViewportLayout::query(runtime, TextureSizeType::DynamicFoveation, view_count));

        log::debug!(
            "Viewports: static {:?}, foveated {:?}",
            static_set.viewports(),
            foveated.as_ref().map(|f| f.viewports())
        );
        Self {
            static_set,
            foveated,
        }
    }

    pub fn view_count(&self) -> usize {
        self.static_set.len()
    }

    pub fn static_set(&self) -> &ViewportLayout {
        &self.static_set
    }

    pub fn foveated_set(&self) -> Option<&ViewportLayout> {
        self.foveated.as_ref()
    }

    /// The set to render with. Foveated viewports need a valid gaze.
    pub fn select(&self, gaze_valid: bool) -> (&ViewportLayout, bool) {
        match &self.foveated {
            Some(foveated) if gaze_valid => (foveated, true),
            _ => (&self.static_set, false),
        }
    }

    /// Atlas large enough for every set.
    pub fn atlas_size(&self) -> (i32, i32) {
        let (w, h) = self.static_set.extent();
        match &self.foveated {
            Some(foveated) => {
                let (fw, fh) = foveated.extent();
                (w.max(fw), h.max(fh))
            }
            None => (w, h),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::SimulatedRuntime;

    #[test]
    fn test_quad_layout() {
        let runtime = SimulatedRuntime::default();
        let sets = ViewportSets::new(&runtime, false, false);
        let vps = sets.static_set().viewports();
        assert_eq!(vps.len(), 4);
        assert_eq!(vps[0], Viewport::new(0, 0, 1152, 1152));
        assert_eq!(vps[1], Viewport::new(1152, 0, 1152, 1152));
        assert_eq!(vps[2], Viewport::new(0, 1152, 1536, 1536));
        assert_eq!(vps[3], Viewport::new(1536, 1152, 1536, 1536));
        assert_eq!(sets.atlas_size(), (3072, 2688));
    }

    #[test]
    fn test_viewports_fit_atlas_without_overlap() {
        let runtime = SimulatedRuntime::default();
        for (stereo, dynamic) in [(false, false), (false, true), (true, false), (true, true)] {
            let sets = ViewportSets::new(&runtime, stereo, dynamic);
            let (aw, ah) = sets.atlas_size();
            let layouts = std::iter::once(sets.static_set()).chain(sets.foveated_set());
            for layout in layouts {
                let vps = layout.viewports();
                for (i, a) in vps.iter().enumerate() {
                    assert!(a.x >= 0 && a.y >= 0 && a.right() <= aw && a.bottom() <= ah);
                    for b in &vps[i + 1..] {
                        assert!(!a.overlaps(b));
                    }
                }
            }
        }
    }

    #[test]
    fn test_stereo_layout() {
        let runtime = SimulatedRuntime::default();
        let sets = ViewportSets::new(&runtime, true, false);
        assert_eq!(sets.view_count(), 2);
        assert_eq!(sets.atlas_size(), (2304, 1152));
    }

    #[test]
    fn test_sizes_clamped() {
        let layout = ViewportLayout::from_sizes(&[(100, 9000), (300, 300)]);
        assert_eq!(layout.get(0), Some(Viewport::new(0, 0, 256, 8096)));
        assert_eq!(layout.get(1), Some(Viewport::new(256, 0, 300, 300)));
    }

    #[test]
    fn test_foveation_needs_gaze() {
        let runtime = SimulatedRuntime::default();
        let sets = ViewportSets::new(&runtime, false, true);
        let (layout, foveated) = sets.select(false);
        assert!(!foveated);
        assert_eq!(layout, sets.static_set());
        let (layout, foveated) = sets.select(true);
        assert!(foveated);
        assert_eq!(layout.get(0), Some(Viewport::new(0, 0, 768, 768)));

        let no_dynamic = ViewportSets::new(&runtime, false, false);
        assert!(!no_dynamic.select(true).1);
    }
}
