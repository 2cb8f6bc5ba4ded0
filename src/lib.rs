//! Heuristic nudity detection: per-pixel HSV skin matching, connected
//! skin regions, and a fixed rule cascade over the dominant region.
//!
//! ```rust
//! use image::DynamicImage;
//!
//! let img = DynamicImage::new_rgb8(64, 64);
//! let analysis = skinscan::scan(&img).expect("empty image").analyse();
//! println!("nude={} skin={}%", analysis.nude, analysis.skin_percent);
//! ```

use failure::Fail;
use image::DynamicImage;
use image::GenericImage;
use image::GenericImageView;
use image::Pixel as ImagePixel;
use image::Primitive;
use image::Rgb;
use image::Rgba;
use log::*;
use rand::Rng;
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;

/// Skin-tone envelope in HSV; hue in degrees, saturation and value in [0,1].
const SKIN_HUE_MAX: f64 = 50.0;
const SKIN_SAT_MIN: f64 = 0.23;
const SKIN_SAT_MAX: f64 = 0.68;
const SKIN_VAL_MIN: f64 = 0.35;

/// The ways a scan can fail before any pixel analysis happens
#[derive(Debug, Fail)]
pub enum ScanError {
    #[fail(display = "image has zero width or height")]
    EmptyImage,
    #[fail(display = "failed to decode image: {}", _0)]
    Decode(#[fail(cause)] image::ImageError),
}

impl From<image::ImageError> for ScanError {
    fn from(err: image::ImageError) -> ScanError {
        ScanError::Decode(err)
    }
}

/// The final verdict over an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Nude,
    NotNude,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Verdict::Nude => write!(f, "Nude"),
            Verdict::NotNude => write!(f, "Not Nude"),
        }
    }
}

/// The aggregated skin statistics of an image
pub struct Scan {
    width: u32,
    height: u32,
    total_skin: usize,
    /// Flat label grid, `y*width+x`; 0 is background, regions start at 1.
    labels: Vec<u32>,
    /// Regions as (label, pixel count), largest first.
    regions: Vec<(u32, usize)>,
    /// Bounding box area of the largest region, 0 for thin or absent regions.
    polygon_area: u64,
    /// Mean normalized brightness of the largest region.
    average_intensity: f64,
}

/// Scan an image for skin regions
pub fn scan(image: &DynamicImage) -> Result<Scan, ScanError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ScanError::EmptyImage);
    }

    let (mask, skin_pixels) = build_skin_mask(image);
    let total_skin = skin_pixels.len();
    debug!("{} of {}x{} pixels are skin", total_skin, width, height);

    let (labels, num_labels) = label_regions(&mask, width, height);
    let regions = rank_regions(&labels, num_labels);
    debug!("skin regions: {}", regions.len());

    let (polygon_area, average_intensity) = match regions.first() {
        Some(&(label, _)) => {
            let pixels = region_pixels(&labels, width, label);
            let polygon = bounding_polygon(&pixels);
            (polygon_area(polygon), mean_intensity(image, &pixels))
        }
        None => (0, 0.0),
    };

    Ok(Scan {
        width,
        height,
        total_skin,
        labels,
        regions,
        polygon_area,
        average_intensity,
    })
}

/// Decode an image from a path, then scan it
pub fn scan_path<P: AsRef<Path>>(path: P) -> Result<Scan, ScanError> {
    let image = image::open(path)?;
    scan(&image)
}

/// Scan and classify in one call
pub fn classify(image: &DynamicImage) -> Result<Verdict, ScanError> {
    Ok(scan(image)?.analyse().verdict())
}

/// Scan the full grid in row-major order, flagging skin pixels in a flat
/// mask and collecting their coordinates in visit order.
fn build_skin_mask(image: &DynamicImage) -> (Vec<bool>, Vec<(u32, u32)>) {
    let (width, height) = image.dimensions();
    let mut mask = vec![false; width as usize * height as usize];
    let mut skin_pixels = Vec::new();

    for (x, y, pixel) in image.pixels() {
        if classify_skin(pixel.to_rgb()) {
            trace!("detected skin at x={}, y={}", x, y);
            mask[y as usize * width as usize + x as usize] = true;
            skin_pixels.push((x, y));
        }
    }

    (mask, skin_pixels)
}

/// Label every 8-connected component of the mask with a distinct id.
///
/// Ids are assigned in row-major order of first discovery, starting at 1,
/// so the numbering only depends on the mask, not on traversal internals.
fn label_regions(mask: &[bool], width: u32, height: u32) -> (Vec<u32>, u32) {
    let mut labels = vec![0u32; mask.len()];
    let mut num_labels = 0u32;
    let mut queue = VecDeque::new();

    for y in 0..height {
        for x in 0..width {
            let idx = y as usize * width as usize + x as usize;
            if !mask[idx] || labels[idx] != 0 {
                continue;
            }

            num_labels += 1;
            labels[idx] = num_labels;
            queue.push_back((x, y));

            while let Some((px, py)) = queue.pop_front() {
                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }

                        let nx = i64::from(px) + dx;
                        let ny = i64::from(py) + dy;
                        if nx < 0 || ny < 0 || nx >= i64::from(width) || ny >= i64::from(height) {
                            continue;
                        }

                        let nidx = ny as usize * width as usize + nx as usize;
                        if mask[nidx] && labels[nidx] == 0 {
                            labels[nidx] = num_labels;
                            queue.push_back((nx as u32, ny as u32));
                        }
                    }
                }
            }
        }
    }

    (labels, num_labels)
}

/// Count pixels per label and sort the regions by size, largest first.
/// The sort is stable, equal-sized regions keep ascending label order.
fn rank_regions(labels: &[u32], num_labels: u32) -> Vec<(u32, usize)> {
    let mut sizes = vec![0usize; num_labels as usize + 1];
    for &label in labels {
        if label > 0 {
            sizes[label as usize] += 1;
        }
    }

    let mut regions: Vec<(u32, usize)> = (1..=num_labels)
        .map(|label| (label, sizes[label as usize]))
        .collect();
    regions.sort_by(|a, b| a.1.cmp(&b.1).reverse());
    regions
}

/// Collect the coordinates carrying the given label, in row-major order.
fn region_pixels(labels: &[u32], width: u32, label: u32) -> Vec<(u32, u32)> {
    labels
        .iter()
        .enumerate()
        .filter(|(_, &l)| l == label)
        .map(|(idx, _)| {
            (
                (idx % width as usize) as u32,
                (idx / width as usize) as u32,
            )
        })
        .collect()
}

/// Tight axis-aligned bounding box of a pixel set, `None` when empty.
fn bounding_polygon(pixels: &[(u32, u32)]) -> Option<((u32, u32), (u32, u32))> {
    let first = *pixels.first()?;
    let mut min = first;
    let mut max = first;

    for &(x, y) in pixels {
        min.0 = min.0.min(x);
        min.1 = min.1.min(y);
        max.0 = max.0.max(x);
        max.1 = max.1.max(y);
    }

    Some((min, max))
}

/// Area of the bounding box. A single pixel or a 1-pixel-thick line spans
/// zero length on one axis and therefore has area 0.
fn polygon_area(polygon: Option<((u32, u32), (u32, u32))>) -> u64 {
    match polygon {
        Some((min, max)) => u64::from(max.0 - min.0) * u64::from(max.1 - min.1),
        None => 0,
    }
}

/// Mean of (r+g+b)/3 over the given pixels, normalized to [0,1].
fn mean_intensity(image: &DynamicImage, pixels: &[(u32, u32)]) -> f64 {
    if pixels.is_empty() {
        return 0.0;
    }

    let sum: f64 = pixels
        .iter()
        .map(|&(x, y)| {
            let rgb = image.get_pixel(x, y).to_rgb();
            (f64::from(rgb[0]) + f64::from(rgb[1]) + f64::from(rgb[2])) / 3.0
        })
        .sum();

    sum / pixels.len() as f64 / 255.0
}

fn percentage(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        return 0.0;
    }
    part / whole * 100.0
}

impl Scan {
    /// Run the rule cascade and return the verdict with its metrics
    pub fn analyse(&self) -> Analysis {
        let total_pixels = u64::from(self.width) * u64::from(self.height);
        let skin_percent = percentage(self.total_skin as f64, total_pixels as f64);
        let largest_region_percent = percentage(self.region_size(0) as f64, total_pixels as f64);
        let polygon_skin_percent =
            percentage(self.region_size(0) as f64, self.polygon_area as f64);

        debug!("total skin percent is {}%", skin_percent);
        debug!("largest region percent is {}%", largest_region_percent);
        debug!("polygon skin percent is {}%", polygon_skin_percent);
        debug!("average intensity is {}", self.average_intensity);

        Analysis {
            nude: self.apply_rules(skin_percent),
            skin_percent,
            largest_region_percent,
            polygon_skin_percent,
            average_intensity: self.average_intensity,
            regions: self.regions.len(),
        }
    }

    #[inline]
    pub fn is_nude(&self) -> bool {
        self.analyse().nude
    }

    /// Paint every skin region of the scanned image in a random color.
    /// Pixels outside `img` are skipped if the sizes disagree.
    pub fn colorize_regions(&self, img: &mut DynamicImage) {
        let mut rng = rand::thread_rng();

        let mut colors: Vec<Rgba<u8>> = Vec::with_capacity(self.regions.len() + 1);
        colors.push(Rgba([0, 0, 0, 255]));
        for _ in 0..self.regions.len() {
            colors.push(Rgba([rng.gen(), rng.gen(), rng.gen(), 255]));
        }

        let (width, height) = img.dimensions();
        for y in 0..self.height.min(height) {
            for x in 0..self.width.min(width) {
                let label = self.labels[y as usize * self.width as usize + x as usize];
                if label > 0 {
                    img.put_pixel(x, y, colors[label as usize]);
                }
            }
        }
    }

    fn region_size(&self, rank: usize) -> usize {
        self.regions.get(rank).map(|r| r.1).unwrap_or(0)
    }

    // First match wins; anything that survives all five rejections is nude.
    fn apply_rules(&self, skin_percent: f64) -> bool {
        let total_pixels = (u64::from(self.width) * u64::from(self.height)) as f64;
        let total_skin = self.total_skin as f64;
        let largest = self.region_size(0) as f64;
        let second = self.region_size(1) as f64;
        let third = self.region_size(2) as f64;

        if skin_percent < 15.0 {
            debug!("not nude - skin percent is < 15%");
            return false;
        }

        if largest < 0.35 * total_skin && second < 0.3 * total_skin && third < 0.3 * total_skin {
            debug!("not nude - less than 35%,30%,30% in the biggest regions");
            return false;
        }

        if largest < 0.45 * total_skin {
            debug!("not nude - the biggest region contains less than 45%");
            return false;
        }

        if total_skin < 0.3 * total_pixels && largest < 0.55 * self.polygon_area as f64 {
            debug!("not nude - the biggest region fills too little of its bounding box");
            return false;
        }

        if self.regions.len() > 60 && self.average_intensity < 0.25 {
            debug!("not nude - more than 60 regions and low intensity");
            return false;
        }

        true
    }
}

/// The final analysis of an image
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    /// The classification whether this image is a nudie
    pub nude: bool,
    /// The percentage of skin pixels in the image
    pub skin_percent: f64,
    /// The largest skin region, as a percentage of the image
    pub largest_region_percent: f64,
    /// How much of its bounding box the largest region fills, 0 when the
    /// box is degenerate
    pub polygon_skin_percent: f64,
    /// Mean normalized brightness of the largest region
    pub average_intensity: f64,
    /// Number of connected skin regions
    pub regions: usize,
}

impl Analysis {
    #[inline]
    pub fn verdict(&self) -> Verdict {
        if self.nude {
            Verdict::Nude
        } else {
            Verdict::NotNude
        }
    }

    /// Returns a combined score of `nude` and `skin_percent`.
    /// score > 1.0 indicates a detected nudie.
    ///
    /// ```
    /// # use skinscan::Analysis;
    /// let analysis = Analysis {
    ///     nude: true,
    ///     skin_percent: 65.34,
    ///     largest_region_percent: 48.2,
    ///     polygon_skin_percent: 71.9,
    ///     average_intensity: 0.41,
    ///     regions: 3,
    /// };
    /// assert_eq!(analysis.score(), 1.6534);
    ///
    /// let analysis = Analysis {
    ///     nude: false,
    ///     skin_percent: 12.3,
    ///     largest_region_percent: 4.1,
    ///     polygon_skin_percent: 38.0,
    ///     average_intensity: 0.56,
    ///     regions: 17,
    /// };
    /// assert_eq!(analysis.score(), 0.12300000000000001);
    /// ```
    #[inline]
    pub fn score(&self) -> f64 {
        let nude = if self.nude { 1.0 } else { 0.0 };
        nude + (self.skin_percent / 100.0)
    }
}

#[inline]
fn math_max(r: f64, g: f64, b: f64) -> f64 {
    let mut x = r;
    if g > x {
        x = g;
    }
    if b > x {
        x = b;
    }
    x
}

#[inline]
fn math_min(r: f64, g: f64, b: f64) -> f64 {
    let mut x = r;
    if g < x {
        x = g;
    }
    if b < x {
        x = b;
    }
    x
}

/// Determine if the pixel is likely to be a skin pixel
pub fn classify_skin<T: Primitive>(rgb: Rgb<T>) -> bool
where
    T: Into<f64>,
{
    let (h, s, v) = to_hsv(rgb);

    h >= 0.0 && h <= SKIN_HUE_MAX && s >= SKIN_SAT_MIN && s <= SKIN_SAT_MAX && v >= SKIN_VAL_MIN
}

/// Standard RGB to HSV: hue in degrees [0,360), saturation and value in
/// [0,1]. Hue is 0 for grays, saturation is 0 for black.
fn to_hsv<T: Primitive>(rgb: Rgb<T>) -> (f64, f64, f64)
where
    T: Into<f64>,
{
    let r: f64 = rgb[0].into();
    let g: f64 = rgb[1].into();
    let b: f64 = rgb[2].into();

    let mx = math_max(r, g, b);
    let mn = math_min(r, g, b);
    let dif = mx - mn;

    let value = mx / 255.0;
    let saturation = if mx > 0.0 { dif / mx } else { 0.0 };

    if dif == 0.0 {
        return (0.0, saturation, value);
    }

    let mut h = if mx == r {
        (g - b) / dif
    } else if mx == g {
        2.0 + ((b - r) / dif)
    } else {
        4.0 + ((r - g) / dif)
    };

    h *= 60.0;

    if h < 0.0 {
        h += 360.0;
    }

    (h, saturation, value)
}
