// THEORY:
// Regions are the user's way of saying "only this part of the picture matters".
// They are stored in percentage-of-image coordinates (0..=100 on both axes) rather
// than pixels, so a region drawn on a low-resolution preview stays valid on a full
// resolution capture of the same aspect ratio.
//
// Key architectural principles:
// 1.  **Validation at the door**: A region with zero (or non-finite) area is
//     rejected when it is added. Everything past `RegionSet::add` can assume a
//     well-formed rectangle.
// 2.  **Caller-owned**: The engine never mutates regions. They are created, toggled
//     and removed by the caller and survive across monitoring sessions.
// 3.  **Empty set vs. inactive set**: An empty set means "watch the whole frame".
//     A non-empty set whose members are all inactive means "watch nothing". The
//     distinction is made explicit by `RegionMask`.
// 4.  **Overlap is allowed**: A pixel is considered when it lies in at least one
//     active region; overlapping regions never count a pixel twice.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SentinelError};

/// Identifier of a region within a `RegionSet`.
pub type RegionId = String;

/// Drag gestures must exceed this extent (percent, per axis) to create a region.
pub const MIN_DRAG_EXTENT: f64 = 5.0;

/// A rectangle in percentage-of-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clamps the rectangle onto the image and rejects empty or non-finite results.
    fn normalized(self) -> Result<Rect> {
        let values = [self.x, self.y, self.width, self.height];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(SentinelError::InvalidRegion(format!(
                "non-finite bounds {:?}",
                self
            )));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(SentinelError::InvalidRegion(format!(
                "zero area ({} x {})",
                self.width, self.height
            )));
        }
        let x = self.x.clamp(0.0, 100.0);
        let y = self.y.clamp(0.0, 100.0);
        let right = (self.x + self.width).clamp(0.0, 100.0);
        let bottom = (self.y + self.height).clamp(0.0, 100.0);
        let rect = Rect::new(x, y, right - x, bottom - y);
        if rect.width <= 0.0 || rect.height <= 0.0 {
            return Err(SentinelError::InvalidRegion(format!(
                "{:?} lies outside the image",
                self
            )));
        }
        Ok(rect)
    }
}

/// A rectangular area of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: RegionId,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub name: String,
    pub is_active: bool,
}

impl Region {
    pub fn bounds(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    /// Whether a point in percent coordinates lies inside the region.
    /// The rectangle is half-open: left/top edges are in, right/bottom edges are out.
    #[inline]
    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x && px < self.x + self.width && py >= self.y && py < self.y + self.height
    }
}

/// Which part of a frame the comparator should look at.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionMask {
    /// No regions are configured; every pixel is considered.
    WholeFrame,
    /// Only pixels inside at least one of these regions are considered.
    /// An empty list considers nothing.
    Regions(Vec<Region>),
}

impl RegionMask {
    /// Names of the regions scoping the comparison, if any.
    pub fn region_names(&self) -> Vec<String> {
        match self {
            RegionMask::WholeFrame => Vec::new(),
            RegionMask::Regions(regions) => regions.iter().map(|r| r.name.clone()).collect(),
        }
    }
}

/// The caller-owned list of monitoring regions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Region>", into = "Vec<Region>")]
pub struct RegionSet {
    regions: Vec<Region>,
}

impl RegionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an active region and returns its new id.
    ///
    /// Bounds are clamped onto the image; a zero-area result is rejected with
    /// `InvalidRegion` and nothing is created. Without a name the region is called
    /// `Region <n>`, n being the set's size after insertion. Names containing
    /// control characters (line breaks included) are rejected.
    pub fn add(&mut self, bounds: Rect, name: Option<String>) -> Result<RegionId> {
        let rect = bounds.normalized()?;
        if let Some(name) = &name {
            check_name(name)?;
        }
        let id = Uuid::new_v4().to_string();
        let name = name.unwrap_or_else(|| format!("Region {}", self.regions.len() + 1));
        self.regions.push(Region {
            id: id.clone(),
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            name,
            is_active: true,
        });
        Ok(id)
    }

    /// Adds a region from two drag corners given in percent coordinates, in any
    /// order. The drag must exceed `MIN_DRAG_EXTENT` on both axes.
    pub fn add_from_drag(&mut self, start: (f64, f64), end: (f64, f64)) -> Result<RegionId> {
        let left = start.0.min(end.0);
        let top = start.1.min(end.1);
        let width = (end.0 - start.0).abs();
        let height = (end.1 - start.1).abs();
        if !(width > MIN_DRAG_EXTENT && height > MIN_DRAG_EXTENT) {
            return Err(SentinelError::InvalidRegion(format!(
                "drag of {:.1} x {:.1} is below the {}% minimum",
                width, height, MIN_DRAG_EXTENT
            )));
        }
        self.add(Rect::new(left, top, width, height), None)
    }

    /// Removes a region, returning it if it existed.
    pub fn remove(&mut self, id: &str) -> Option<Region> {
        let index = self.regions.iter().position(|r| r.id == id)?;
        Some(self.regions.remove(index))
    }

    /// Flips a region's active flag and returns the new value.
    pub fn toggle(&mut self, id: &str) -> Option<bool> {
        let region = self.regions.iter_mut().find(|r| r.id == id)?;
        region.is_active = !region.is_active;
        Some(region.is_active)
    }

    pub fn get(&self, id: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    /// The regions whose `is_active` flag is set, in insertion order.
    pub fn active_regions(&self) -> Vec<Region> {
        self.regions.iter().filter(|r| r.is_active).cloned().collect()
    }

    /// The mask the comparator should apply for this set.
    pub fn mask(&self) -> RegionMask {
        if self.regions.is_empty() {
            RegionMask::WholeFrame
        } else {
            RegionMask::Regions(self.active_regions())
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Region names end up in single-line ledger exports.
fn check_name(name: &str) -> Result<()> {
    if name.chars().any(char::is_control) {
        return Err(SentinelError::InvalidRegion(format!(
            "name {:?} contains control characters",
            name
        )));
    }
    Ok(())
}

impl TryFrom<Vec<Region>> for RegionSet {
    type Error = SentinelError;

    fn try_from(regions: Vec<Region>) -> Result<Self> {
        for region in &regions {
            region.bounds().normalized()?;
            check_name(&region.name)?;
        }
        Ok(Self { regions })
    }
}

impl From<RegionSet> for Vec<Region> {
    fn from(set: RegionSet) -> Self {
        set.regions
    }
}
